use crate::SchemaError;
use std::fmt;

const DEFAULT_DOMAIN: &str = "docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";

/// A normalized image reference: `domain/path[:tag][@digest]`.
///
/// Normalization follows registry conventions: a bare name like `nginx:1.25`
/// becomes `docker.io/library/nginx:1.25`; a name with a dotted or ported
/// first component keeps it as the registry domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidReference {
            reference: reference.to_owned(),
            reason: reason.to_owned(),
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        // Split off the digest first: it may contain ':' (sha256:...).
        let (rest, digest) = match reference.split_once('@') {
            Some((r, d)) => {
                if !d.contains(':') || d.len() < 8 {
                    return Err(invalid("malformed digest"));
                }
                (r, Some(d.to_owned()))
            }
            None => (reference, None),
        };

        // A ':' after the last '/' is the tag separator; earlier colons
        // belong to the domain's port.
        let (name, tag) = match rest.rfind(':') {
            Some(idx) if rest[idx..].find('/').is_none() => {
                (&rest[..idx], Some(rest[idx + 1..].to_owned()))
            }
            _ => (rest, None),
        };
        if name.is_empty() {
            return Err(invalid("empty repository name"));
        }
        if let Some(t) = &tag {
            if t.is_empty() {
                return Err(invalid("empty tag"));
            }
        }

        // First path component is a domain only if it looks like one.
        let (domain, path) = match name.split_once('/') {
            Some((first, rest_path))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_owned(), rest_path.to_owned())
            }
            _ => {
                let path = if name.contains('/') {
                    name.to_owned()
                } else {
                    format!("{OFFICIAL_REPO_PREFIX}{name}")
                };
                (DEFAULT_DOMAIN.to_owned(), path)
            }
        };
        if path.is_empty() {
            return Err(invalid("empty repository path"));
        }

        Ok(Self {
            domain,
            path,
            tag,
            digest,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The tag, or the conventional default when the reference carries none.
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// The digest-qualified pin for this reference: `domain/path@digest`.
    /// The tag is discarded — the pin alone guarantees reproducibility.
    pub fn pinned(&self, digest: &str) -> String {
        format!("{}/{}@{digest}", self.domain, self.path)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
