mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_COMPOSE_ERROR, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "stowage",
    version,
    about = "Publish compose applications as immutable on-device bundles"
)]
struct Cli {
    /// Path to the local tree repository.
    #[arg(long, default_value = "~/.local/share/stowage/repo")]
    repo: String,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full pipeline: pin, commit, translate, bundle, publish.
    Publish {
        /// Directory holding docker-compose.yml and the app sources.
        #[arg(long, default_value = ".")]
        app_dir: PathBuf,
        /// Registry reference to publish under (e.g. "registry.example.com/shop:stable").
        #[arg(long)]
        target: Option<String>,
        /// Write the bundle next to the app instead of pushing it.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Bearer token for the registry (overrides the config file).
        #[arg(long)]
        token: Option<String>,
    },
    /// Pin every service image to a digest and print the canonical JSON.
    Pin {
        /// Directory holding docker-compose.yml.
        #[arg(long, default_value = ".")]
        app_dir: PathBuf,
        /// Bearer token for the registry (overrides the config file).
        #[arg(long)]
        token: Option<String>,
    },
    /// Validate the compose file against the supported feature set.
    Check {
        /// Directory holding docker-compose.yml.
        #[arg(long, default_value = ".")]
        app_dir: PathBuf,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STOWAGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let repo_path = expand_tilde(&cli.repo);

    let result = match cli.command {
        Commands::Publish {
            app_dir,
            target,
            dry_run,
            token,
        } => commands::publish::run(
            &app_dir,
            &repo_path,
            target.as_deref(),
            dry_run,
            token.as_deref(),
        ),
        Commands::Pin { app_dir, token } => commands::pin::run(&app_dir, token.as_deref()),
        Commands::Check { app_dir } => commands::check::run(&app_dir),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("compose error:") {
                EXIT_COMPOSE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
