use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use covlay::cli::{self, Style};
use covlay::config::ServiceConfig;
use covlay::service::CodecovService;
use covlay::storage::SqliteStorage;

/// Inspect Codecov coverage of GitHub files and pull requests.
#[derive(Parser)]
#[command(name = "covlay", version, about)]
struct Cli {
    /// Log debug output to stderr.
    #[arg(long, global = true)]
    debug: bool,

    /// Base URL of the coverage API (default: the stored self-hosted
    /// setting, or Codecov cloud).
    #[arg(long, global = true, env = "COVLAY_API_URL")]
    api_url: Option<String>,

    /// Provider segment of API paths, e.g. github or github_enterprise.
    #[arg(long, global = true, env = "COVLAY_SERVICE")]
    service: Option<String>,

    /// API token sent as a bearer token.
    #[arg(long, global = true, env = "CODECOV_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    /// Path to the SQLite settings store (default: ./.covlay.db)
    #[arg(long, global = true, default_value = ".covlay.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show line coverage of a file view URL.
    File {
        /// e.g. https://github.com/owner/repo/blob/main/src/lib.rs
        url: String,

        /// Restrict to a flag; may be repeated.
        #[arg(long = "flag", conflicts_with = "components")]
        flags: Vec<String>,

        /// Restrict to a component; may be repeated.
        #[arg(long = "component")]
        components: Vec<String>,

        #[arg(long, value_enum, default_value = "text")]
        style: Style,
    },

    /// Show the coverage comparison of a pull request files view URL.
    Pr {
        url: String,

        #[arg(long, value_enum, default_value = "text")]
        style: Style,
    },

    /// List the flags of the repository a URL points into.
    Flags { url: String },

    /// List the components of the repository a URL points into.
    Components { url: String },

    /// Store which flags or components later `file` runs are filtered by.
    Select {
        url: String,

        #[arg(long = "flag", conflicts_with_all = ["components", "clear"])]
        flags: Vec<String>,

        #[arg(long = "component", conflicts_with = "clear")]
        components: Vec<String>,

        /// Forget the stored selection.
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::stderr)
            .init();
    }

    let storage = SqliteStorage::open(&cli.db).context("Failed to open settings store")?;
    let stored = ServiceConfig::from_storage(&storage)
        .await
        .context("Failed to read service settings")?;
    let config = ServiceConfig::new(
        cli.api_url.as_deref().unwrap_or(&stored.api_url),
        cli.service.as_deref().unwrap_or(&stored.service),
        cli.token.or(stored.token),
    );
    let agent = ureq::AgentBuilder::new()
        .user_agent(concat!("covlay/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(cli.timeout))
        .build();
    let background = CodecovService::with_agent(config, agent);

    let output = match cli.command {
        Commands::File {
            url,
            flags,
            components,
            style,
        } => cli::cmd_file(&background, &storage, &url, &flags, &components, style).await,
        Commands::Pr { url, style } => cli::cmd_pr(&background, &url, style).await,
        Commands::Flags { url } => cli::cmd_flags(&background, &url).await,
        Commands::Components { url } => cli::cmd_components(&background, &url).await,
        Commands::Select {
            url,
            flags,
            components,
            clear,
        } => cli::cmd_select(&storage, &url, &flags, &components, clear).await,
    }?;
    print!("{output}");
    Ok(())
}
