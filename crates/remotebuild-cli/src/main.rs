//! remotebuild CLI tool.

use clap::{Parser, Subcommand};
use remotebuild_core::UploadType;

mod commands;

use commands::jobs::SubmitOptions;

#[derive(Parser)]
#[command(name = "remotebuild")]
#[command(about = "Remote package build client", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "REMOTEBUILD_API_URL", default_value = "http://localhost:8090")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an AUR package build
    Submit {
        /// AUR package name
        #[arg(long)]
        package: String,
        /// Where to upload the built packages: local or dmanager
        #[arg(long)]
        upload: Option<UploadType>,
        /// Build without ccache
        #[arg(long)]
        no_ccache: bool,
        /// DataManager host
        #[arg(long, env = "REMOTEBUILD_DM_HOST")]
        dm_host: Option<String>,
        /// DataManager user
        #[arg(long, env = "REMOTEBUILD_DM_USER")]
        dm_user: Option<String>,
        /// Base64 encoded DataManager session token
        #[arg(long, env = "REMOTEBUILD_DM_TOKEN", hide_env_values = true)]
        dm_token: Option<String>,
        /// DataManager namespace
        #[arg(long)]
        dm_namespace: Option<String>,
    },
    /// Cancel a job
    Cancel {
        /// Job ID
        id: String,
    },
    /// Show job details
    Info {
        /// Job ID
        id: String,
    },
    /// List recently finished jobs
    List {
        /// Maximum number of jobs to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Print the captured build output of a job
    Logs {
        /// Job ID
        id: String,
    },
    /// Validate a server configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "remotebuild.kdl")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            package,
            upload,
            no_ccache,
            dm_host,
            dm_user,
            dm_token,
            dm_namespace,
        } => {
            let options = SubmitOptions {
                package,
                upload: upload.unwrap_or_default(),
                no_ccache,
                dm_host,
                dm_user,
                dm_token,
                dm_namespace,
            };
            commands::jobs::submit(&cli.api_url, options).await?;
        }
        Commands::Cancel { id } => {
            commands::jobs::cancel(&cli.api_url, &id).await?;
        }
        Commands::Info { id } => {
            commands::jobs::info(&cli.api_url, &id).await?;
        }
        Commands::List { limit } => {
            commands::jobs::list(&cli.api_url, limit).await?;
        }
        Commands::Logs { id } => {
            commands::jobs::logs(&cli.api_url, &id).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
