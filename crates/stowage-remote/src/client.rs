use crate::manifest::{sha256_digest, Descriptor, Manifest};
use crate::{RegistryConfig, RemoteError};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Mutex;
use stowage_schema::ImageRef;
use tracing::debug;

const ACCEPT_MANIFESTS: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Synchronous registry v2 client.
///
/// One gateway value is constructed per run and passed to every component
/// that talks to a registry. Bearer tokens are resolved lazily: a static
/// token from [`RegistryConfig`] wins; otherwise a 401 with a
/// `WWW-Authenticate: Bearer` challenge triggers anonymous token auth
/// against the registry's token endpoint, cached per repository.
pub struct RegistryGateway {
    agent: ureq::Agent,
    config: RegistryConfig,
    tokens: Mutex<BTreeMap<String, String>>,
}

impl RegistryGateway {
    pub fn new(config: RegistryConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self {
            agent,
            config,
            tokens: Mutex::new(BTreeMap::new()),
        }
    }

    /// Resolve the tag of `reference` to a descriptor (digest, media type,
    /// size) without downloading the manifest body twice.
    pub fn get_tag(&self, reference: &ImageRef) -> Result<Descriptor, RemoteError> {
        let url = self.manifest_url(reference, reference.tag_or_latest());
        let (resp, body) = self.get_with_auth(&url, reference, ACCEPT_MANIFESTS)?;

        let media_type = header(&resp.headers, "content-type");
        let digest = match header_opt(&resp.headers, "docker-content-digest") {
            Some(d) => d,
            None => sha256_digest(&body),
        };
        Ok(Descriptor {
            media_type,
            size: body.len() as u64,
            digest,
            platform: None,
        })
    }

    /// Fetch and decode the manifest at `digest`.
    pub fn get_manifest(&self, reference: &ImageRef, digest: &str) -> Result<Manifest, RemoteError> {
        let url = self.manifest_url(reference, digest);
        let (resp, body) = self.get_with_auth(&url, reference, ACCEPT_MANIFESTS)?;
        let media_type = header(&resp.headers, "content-type");

        let actual = sha256_digest(&body);
        if actual != digest {
            return Err(RemoteError::DigestMismatch {
                reference: reference.to_string(),
                expected: digest.to_owned(),
                actual,
            });
        }
        Manifest::from_bytes(&media_type, &body)
    }

    /// Download a blob, verifying its digest.
    pub fn get_blob(&self, reference: &ImageRef, digest: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.blob_url(reference, digest);
        let (_resp, body) = self.get_with_auth(&url, reference, "application/octet-stream")?;
        let actual = sha256_digest(&body);
        if actual != digest {
            return Err(RemoteError::DigestMismatch {
                reference: reference.to_string(),
                expected: digest.to_owned(),
                actual,
            });
        }
        Ok(body)
    }

    /// Open a blob as a byte stream. The digest is not verified — callers
    /// that need verification use [`get_blob`](Self::get_blob).
    pub fn open_blob(
        &self,
        reference: &ImageRef,
        digest: &str,
    ) -> Result<Box<dyn Read + Send + Sync>, RemoteError> {
        let url = self.blob_url(reference, digest);
        debug!("GET {url} (streaming)");
        let token = self.token_for(reference, false)?;
        let mut req = self.agent.get(&url).header("Accept", "application/octet-stream");
        if let Some(t) = &token {
            req = req.header("Authorization", &format!("Bearer {t}"));
        }
        let resp = req.call().map_err(|e| RemoteError::Http(e.to_string()))?;
        match resp.status().as_u16() {
            200 => Ok(Box::new(resp.into_body().into_reader())),
            404 => Err(RemoteError::NotFound(url)),
            code => Err(RemoteError::Http(format!("HTTP {code} for {url}"))),
        }
    }

    /// Upload a blob via the two-step upload session. Returns the
    /// descriptor of the uploaded content. Content-addressed, so re-uploads
    /// of identical bytes always yield the same digest.
    pub fn put_blob(
        &self,
        reference: &ImageRef,
        media_type: &str,
        data: &[u8],
    ) -> Result<Descriptor, RemoteError> {
        let digest = sha256_digest(data);
        let start_url = format!("{}/blobs/uploads/", self.repo_base(reference));
        debug!("POST {start_url} ({} bytes to follow)", data.len());

        let token = self.token_for(reference, true)?;
        let mut req = self.agent.post(&start_url);
        if let Some(t) = &token {
            req = req.header("Authorization", &format!("Bearer {t}"));
        }
        let resp = req
            .send(&[] as &[u8])
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        if status != 202 {
            return Err(RemoteError::Http(format!(
                "HTTP {status} starting blob upload at {start_url}"
            )));
        }
        let location = header_opt(resp.headers(), "location")
            .ok_or_else(|| RemoteError::Http("upload session missing Location".to_owned()))?;
        let location = self.absolute(reference, &location);

        let sep = if location.contains('?') { '&' } else { '?' };
        let put_url = format!("{location}{sep}digest={digest}");
        debug!("PUT {put_url} ({} bytes)", data.len());
        let mut req = self
            .agent
            .put(&put_url)
            .header("Content-Type", "application/octet-stream");
        if let Some(t) = &token {
            req = req.header("Authorization", &format!("Bearer {t}"));
        }
        let resp = req.send(data).map_err(|e| RemoteError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(RemoteError::Http(format!(
                "HTTP {status} completing blob upload for {digest}"
            )));
        }

        Ok(Descriptor {
            media_type: media_type.to_owned(),
            size: data.len() as u64,
            digest,
            platform: None,
        })
    }

    /// Push a manifest under `tag`. Returns its digest.
    ///
    /// The blob a manifest references is idempotent by content addressing;
    /// this tag write is not — the registry may re-point the tag.
    pub fn put_manifest(
        &self,
        reference: &ImageRef,
        media_type: &str,
        body: &[u8],
        tag: &str,
    ) -> Result<String, RemoteError> {
        let url = self.manifest_url(reference, tag);
        debug!("PUT {url} ({} bytes)", body.len());
        let token = self.token_for(reference, true)?;
        let mut req = self.agent.put(&url).header("Content-Type", media_type);
        if let Some(t) = &token {
            req = req.header("Authorization", &format!("Bearer {t}"));
        }
        let resp = req.send(body).map_err(|e| RemoteError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(RemoteError::Http(format!("HTTP {status} for PUT {url}")));
        }
        Ok(match header_opt(resp.headers(), "docker-content-digest") {
            Some(d) => d,
            None => sha256_digest(body),
        })
    }

    // --- URL derivation ---

    fn api_base(reference: &ImageRef) -> String {
        let domain = match reference.domain() {
            // Hub references resolve against the real registry endpoint.
            "docker.io" => "registry-1.docker.io",
            other => other,
        };
        let scheme = if domain.starts_with("localhost")
            || domain.starts_with("127.0.0.1")
            || domain.starts_with("[::1]")
        {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{domain}/v2")
    }

    fn repo_base(&self, reference: &ImageRef) -> String {
        format!("{}/{}", Self::api_base(reference), reference.path())
    }

    fn manifest_url(&self, reference: &ImageRef, tag_or_digest: &str) -> String {
        format!("{}/manifests/{tag_or_digest}", self.repo_base(reference))
    }

    fn blob_url(&self, reference: &ImageRef, digest: &str) -> String {
        format!("{}/blobs/{digest}", self.repo_base(reference))
    }

    fn absolute(&self, reference: &ImageRef, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_owned()
        } else {
            let base = Self::api_base(reference);
            // api_base ends in /v2; Location is server-absolute.
            let origin = base.trim_end_matches("/v2");
            format!("{origin}{location}")
        }
    }

    // --- Auth ---

    fn token_for(&self, reference: &ImageRef, push: bool) -> Result<Option<String>, RemoteError> {
        if let Some(token) = &self.config.auth_token {
            return Ok(Some(token.clone()));
        }
        let key = format!("{}/{}#{}", reference.domain(), reference.path(), push);
        let cached = self
            .tokens
            .lock()
            .map_err(|_| RemoteError::Auth("token cache poisoned".to_owned()))?
            .get(&key)
            .cloned();
        Ok(cached)
    }

    fn cache_token(&self, reference: &ImageRef, push: bool, token: String) {
        let key = format!("{}/{}#{}", reference.domain(), reference.path(), push);
        if let Ok(mut map) = self.tokens.lock() {
            map.insert(key, token);
        }
    }

    /// Anonymous token auth: follow the `WWW-Authenticate: Bearer` challenge
    /// to the token endpoint and retry with the issued token.
    fn fetch_challenge_token(
        &self,
        reference: &ImageRef,
        challenge: &str,
    ) -> Result<String, RemoteError> {
        let params = parse_bearer_challenge(challenge)
            .ok_or_else(|| RemoteError::Auth(format!("unparseable challenge: {challenge}")))?;
        let scope = params.scope.unwrap_or_else(|| {
            format!("repository:{}:pull", reference.path())
        });
        let mut url = format!("{}?scope={scope}", params.realm);
        if let Some(service) = params.service {
            url.push_str(&format!("&service={service}"));
        }
        debug!("GET {url} (token auth)");
        let resp = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        if resp.status().as_u16() != 200 {
            return Err(RemoteError::Auth(format!(
                "token endpoint returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        let body = read_body(resp)?;

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            token: String,
            #[serde(default)]
            access_token: String,
        }
        let tr: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Auth(format!("invalid token response: {e}")))?;
        let token = if tr.token.is_empty() { tr.access_token } else { tr.token };
        if token.is_empty() {
            return Err(RemoteError::Auth("token endpoint issued no token".to_owned()));
        }
        Ok(token)
    }

    /// GET with one 401-challenge retry. Returns the final response headers
    /// (status already checked) and the full body.
    fn get_with_auth(
        &self,
        url: &str,
        reference: &ImageRef,
        accept: &str,
    ) -> Result<(ureq::http::response::Parts, Vec<u8>), RemoteError> {
        debug!("GET {url}");
        let mut token = self.token_for(reference, false)?;

        for attempt in 0..2 {
            let mut req = self.agent.get(url).header("Accept", accept);
            if let Some(t) = &token {
                req = req.header("Authorization", &format!("Bearer {t}"));
            }
            let resp = req.call().map_err(|e| RemoteError::Http(e.to_string()))?;
            match resp.status().as_u16() {
                200 => {
                    let (parts, body) = resp.into_parts();
                    let mut data = Vec::new();
                    body.into_reader()
                        .read_to_end(&mut data)
                        .map_err(|e| RemoteError::Http(e.to_string()))?;
                    return Ok((parts, data));
                }
                401 if attempt == 0 && self.config.auth_token.is_none() => {
                    let challenge = resp
                        .headers()
                        .get("www-authenticate")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_owned();
                    let fresh = self.fetch_challenge_token(reference, &challenge)?;
                    self.cache_token(reference, false, fresh.clone());
                    token = Some(fresh);
                }
                404 => return Err(RemoteError::NotFound(url.to_owned())),
                code => return Err(RemoteError::Http(format!("HTTP {code} for {url}"))),
            }
        }
        Err(RemoteError::Auth(format!("authentication failed for {url}")))
    }
}

fn header(headers: &ureq::http::HeaderMap, name: &str) -> String {
    header_opt(headers, name).unwrap_or_default()
}

fn header_opt(headers: &ureq::http::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn read_body(resp: ureq::http::Response<ureq::Body>) -> Result<Vec<u8>, RemoteError> {
    let mut data = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut data)
        .map_err(|e| RemoteError::Http(e.to_string()))?;
    Ok(data)
}

struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

/// Parse `Bearer realm="...",service="...",scope="..."`.
fn parse_bearer_challenge(value: &str) -> Option<BearerChallenge> {
    let rest = value.trim().strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in rest.split(',') {
        let (k, v) = part.trim().split_once('=')?;
        let v = v.trim_matches('"').to_owned();
        match k {
            "realm" => realm = Some(v),
            "service" => service = Some(v),
            "scope" => scope = Some(v),
            _ => {}
        }
    }
    Some(BearerChallenge {
        realm: realm?,
        service,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{media_types, sha256_digest, ImageManifest};
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::Arc;

    /// Minimal in-process registry v2 endpoint. Serves manifests and blobs
    /// from an in-memory map, accepts the two-step blob upload, and can be
    /// switched into token-auth mode where unauthenticated requests get a
    /// 401 challenge pointing back at its own `/token` route.
    struct MockRegistry {
        port: u16,
        _handle: std::thread::JoinHandle<()>,
        store: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
        require_token: bool,
    }

    impl MockRegistry {
        fn start() -> Self {
            Self::start_with_auth(false)
        }

        fn start_with_auth(require_token: bool) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let store: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>> =
                Arc::new(Mutex::new(HashMap::new()));

            let store_clone = Arc::clone(&store);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let store = Arc::clone(&store_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let method = parts[0].to_owned();
                        let target = parts[1].to_owned();
                        let (path, query) = match target.split_once('?') {
                            Some((p, q)) => (p.to_owned(), q.to_owned()),
                            None => (target.clone(), String::new()),
                        };

                        let mut content_length: usize = 0;
                        let mut authorized = false;
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            let lower = line.to_lowercase();
                            if let Some(val) = lower.strip_prefix("content-length: ") {
                                content_length = val.trim().parse().unwrap_or(0);
                            }
                            if lower.starts_with("authorization: bearer mock-token") {
                                authorized = true;
                            }
                        }
                        let mut body = vec![0u8; content_length];
                        if content_length > 0 {
                            let _ = reader.read_exact(&mut body);
                        }

                        let mut data = store.lock().unwrap();
                        let response: Vec<u8> = if path == "/token" {
                            ok_json(br#"{"token":"mock-token"}"#)
                        } else if require_token && !authorized {
                            let port = stream.local_addr().map(|a| a.port()).unwrap_or(0);
                            format!(
                                "HTTP/1.1 401 Unauthorized\r\n\
                                 WWW-Authenticate: Bearer realm=\"http://127.0.0.1:{port}/token\",service=\"mock\"\r\n\
                                 Content-Length: 0\r\nConnection: close\r\n\r\n"
                            )
                            .into_bytes()
                        } else {
                            route(&method, &path, &query, &body, &mut data)
                        };

                        let _ = stream.write_all(&response);
                        let _ = stream.flush();
                    });
                }
            });

            MockRegistry {
                port,
                _handle: handle,
                store,
                require_token,
            }
        }

        fn reference(&self, rest: &str) -> ImageRef {
            ImageRef::parse(&format!("127.0.0.1:{}/{rest}", self.port)).unwrap()
        }

        fn seed(&self, path: &str, content_type: &str, body: &[u8]) {
            self.store
                .lock()
                .unwrap()
                .insert(path.to_owned(), (content_type.to_owned(), body.to_vec()));
        }

        fn stored(&self, path: &str) -> Option<Vec<u8>> {
            self.store.lock().unwrap().get(path).map(|(_, b)| b.clone())
        }
    }

    fn ok_json(body: &[u8]) -> Vec<u8> {
        let mut resp = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        resp.extend_from_slice(body);
        resp
    }

    fn route(
        method: &str,
        path: &str,
        query: &str,
        body: &[u8],
        data: &mut HashMap<String, (String, Vec<u8>)>,
    ) -> Vec<u8> {
        match method {
            "GET" => match data.get(path) {
                Some((ct, stored)) => {
                    let digest = sha256_digest(stored);
                    let mut resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {ct}\r\nDocker-Content-Digest: {digest}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        stored.len()
                    )
                    .into_bytes();
                    resp.extend_from_slice(stored);
                    resp
                }
                None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    .to_vec(),
            },
            "POST" if path.ends_with("/blobs/uploads/") => format!(
                "HTTP/1.1 202 Accepted\r\nLocation: {path}session-1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )
            .into_bytes(),
            "PUT" if path.contains("/blobs/uploads/") => {
                let digest = query
                    .split('&')
                    .find_map(|kv| kv.strip_prefix("digest="))
                    .unwrap_or_default();
                let repo = path.split("/blobs/uploads/").next().unwrap_or_default();
                data.insert(
                    format!("{repo}/blobs/{digest}"),
                    ("application/octet-stream".to_owned(), body.to_vec()),
                );
                b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
            }
            "PUT" if path.contains("/manifests/") => {
                let digest = sha256_digest(body);
                data.insert(
                    path.to_owned(),
                    ("application/json".to_owned(), body.to_vec()),
                );
                format!(
                    "HTTP/1.1 201 Created\r\nDocker-Content-Digest: {digest}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                )
                .into_bytes()
            }
            _ => b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_vec(),
        }
    }

    fn sample_manifest() -> Vec<u8> {
        let manifest = ImageManifest {
            schema_version: 2,
            media_type: media_types::DOCKER_MANIFEST.to_owned(),
            config: Descriptor {
                media_type: media_types::CONTAINER_CONFIG.to_owned(),
                size: 2,
                digest: sha256_digest(b"{}"),
                platform: None,
            },
            layers: Vec::new(),
            annotations: Default::default(),
        };
        serde_json::to_vec(&manifest).unwrap()
    }

    #[test]
    fn get_tag_returns_descriptor_with_digest() {
        let server = MockRegistry::start();
        let gw = RegistryGateway::new(RegistryConfig::new());
        let r = server.reference("team/app:v1");

        let body = sample_manifest();
        server.seed(
            "/v2/team/app/manifests/v1",
            media_types::DOCKER_MANIFEST,
            &body,
        );

        let desc = gw.get_tag(&r).unwrap();
        assert_eq!(desc.digest, sha256_digest(&body));
        assert_eq!(desc.media_type, media_types::DOCKER_MANIFEST);
        assert_eq!(desc.size, body.len() as u64);
    }

    #[test]
    fn get_manifest_decodes_and_verifies_digest() {
        let server = MockRegistry::start();
        let gw = RegistryGateway::new(RegistryConfig::new());
        let r = server.reference("team/app:v1");

        let body = sample_manifest();
        let digest = sha256_digest(&body);
        server.seed(
            &format!("/v2/team/app/manifests/{digest}"),
            media_types::DOCKER_MANIFEST,
            &body,
        );

        match gw.get_manifest(&r, &digest).unwrap() {
            Manifest::Image(m) => assert_eq!(m.schema_version, 2),
            Manifest::List(_) => panic!("expected image manifest"),
        }
    }

    #[test]
    fn get_manifest_rejects_digest_mismatch() {
        let server = MockRegistry::start();
        let gw = RegistryGateway::new(RegistryConfig::new());
        let r = server.reference("team/app:v1");

        let body = sample_manifest();
        let wrong = sha256_digest(b"something else");
        server.seed(
            &format!("/v2/team/app/manifests/{wrong}"),
            media_types::DOCKER_MANIFEST,
            &body,
        );

        let err = gw.get_manifest(&r, &wrong).unwrap_err();
        assert!(matches!(err, RemoteError::DigestMismatch { .. }));
    }

    #[test]
    fn blob_upload_roundtrip() {
        let server = MockRegistry::start();
        let gw = RegistryGateway::new(RegistryConfig::new());
        let r = server.reference("team/app:v1");

        let payload = b"bundle bytes".to_vec();
        let desc = gw
            .put_blob(&r, "application/tar+gzip", &payload)
            .unwrap();
        assert_eq!(desc.digest, sha256_digest(&payload));
        assert_eq!(desc.size, payload.len() as u64);

        let fetched = gw.get_blob(&r, &desc.digest).unwrap();
        assert_eq!(fetched, payload);
    }

    #[test]
    fn missing_blob_is_not_found() {
        let server = MockRegistry::start();
        let gw = RegistryGateway::new(RegistryConfig::new());
        let r = server.reference("team/app:v1");

        let err = gw.get_blob(&r, "sha256:nope").unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[test]
    fn put_manifest_returns_registry_digest() {
        let server = MockRegistry::start();
        let gw = RegistryGateway::new(RegistryConfig::new());
        let r = server.reference("team/app:v1");

        let body = sample_manifest();
        let digest = gw
            .put_manifest(&r, media_types::DOCKER_MANIFEST, &body, "v1")
            .unwrap();
        assert_eq!(digest, sha256_digest(&body));
        assert_eq!(
            server.stored("/v2/team/app/manifests/v1").unwrap(),
            body
        );
    }

    #[test]
    fn anonymous_token_auth_follows_challenge() {
        let server = MockRegistry::start_with_auth(true);
        assert!(server.require_token);
        let gw = RegistryGateway::new(RegistryConfig::new());
        let r = server.reference("team/app:v1");

        let body = sample_manifest();
        server.seed(
            "/v2/team/app/manifests/v1",
            media_types::DOCKER_MANIFEST,
            &body,
        );

        // First attempt gets a 401 challenge; the gateway must fetch a
        // token from /token and retry.
        let desc = gw.get_tag(&r).unwrap();
        assert_eq!(desc.digest, sha256_digest(&body));

        // The token is cached: a second call succeeds too.
        let desc = gw.get_tag(&r).unwrap();
        assert_eq!(desc.digest, sha256_digest(&body));
    }

    #[test]
    fn parses_full_bearer_challenge() {
        let c = parse_bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();
        assert_eq!(c.realm, "https://auth.docker.io/token");
        assert_eq!(c.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(c.scope.as_deref(), Some("repository:library/nginx:pull"));
    }

    #[test]
    fn challenge_without_bearer_prefix_is_none() {
        assert!(parse_bearer_challenge(r#"Basic realm="x""#).is_none());
    }

    #[test]
    fn hub_base_url_points_at_registry_endpoint() {
        let r = ImageRef::parse("nginx:1.25").unwrap();
        assert_eq!(
            RegistryGateway::api_base(&r),
            "https://registry-1.docker.io/v2"
        );
    }

    #[test]
    fn localhost_uses_plain_http() {
        let r = ImageRef::parse("127.0.0.1:5000/team/app:v1").unwrap();
        assert_eq!(
            RegistryGateway::api_base(&r),
            "http://127.0.0.1:5000/v2"
        );
    }

    #[test]
    fn relative_upload_location_is_made_absolute() {
        let gw = RegistryGateway::new(RegistryConfig::new());
        let r = ImageRef::parse("127.0.0.1:5000/team/app:v1").unwrap();
        assert_eq!(
            gw.absolute(&r, "/v2/team/app/blobs/uploads/uuid-1"),
            "http://127.0.0.1:5000/v2/team/app/blobs/uploads/uuid-1"
        );
        assert_eq!(
            gw.absolute(&r, "https://cdn.example.com/upload"),
            "https://cdn.example.com/upload"
        );
    }

    #[test]
    fn static_token_wins_over_cache() {
        let gw = RegistryGateway::new(RegistryConfig::new().with_token("static-t"));
        let r = ImageRef::parse("nginx:1.25").unwrap();
        assert_eq!(gw.token_for(&r, false).unwrap().as_deref(), Some("static-t"));
    }
}
