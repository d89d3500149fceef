use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use quay::errors::QuayError;

mod cmd;

#[derive(Parser)]
#[command(name = "quay", version)]
#[command(about = "Git-push deployment for apps run under a process supervisor")]
struct Cli {
    /// Config file path (defaults to $QUAY_CONF, then ~/.quayrc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an app and provision its repo and working copy
    Create {
        name: String,
        /// Remote repository to deploy from (URL or owner/repo shorthand)
        #[arg(long)]
        remote: Option<String>,
        /// Branch to deploy (defaults to master)
        #[arg(long)]
        branch: Option<String>,
        /// Port exported to the app as PORT
        #[arg(long)]
        port: Option<u16>,
        /// Startup script relative to the working copy
        #[arg(long)]
        script: Option<String>,
        /// NODE_ENV for this app
        #[arg(long)]
        node_env: Option<String>,
    },
    /// Stop an app and delete its storage and config entry
    Rm { name: String },
    /// Start an app under the supervisor
    Start { name: String },
    /// Stop and delete all running instances of an app
    Stop { name: String },
    /// Restart all running instances of an app
    Restart { name: String },
    /// Start every registered app
    Startall,
    /// Stop every registered app
    Stopall,
    /// Restart every running instance of a registered app
    Restartall,
    /// List registered apps with status and port
    List,
    /// Delete files under the root directory no registered app owns
    Prune,
    /// Re-render and reinstall every app's post-receive hook
    Hooks,
    /// Print the resolved configuration
    Config,
    /// Run the webhook gateway
    Serve {
        /// Listen port (defaults to web.port from the config, then 19999)
        #[arg(short, long)]
        port: Option<u16>,
        /// Permissive CORS for front-end development
        #[arg(long)]
        dev: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quay=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        match err.downcast_ref::<QuayError>() {
            Some(quay_err) => eprintln!(
                "{} [{}] {}",
                style("error").red().bold(),
                quay_err.code(),
                quay_err
            ),
            None => eprintln!("{} {:#}", style("error").red().bold(), err),
        }
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let manager = cmd::build_manager(cli.config)?;
    match cli.command {
        Commands::Create {
            name,
            remote,
            branch,
            port,
            script,
            node_env,
        } => {
            let options = quay::config::AppOptions {
                remote,
                branch,
                port,
                script,
                node_env,
                ..Default::default()
            };
            cmd::cmd_create(&manager, &name, options).await
        }
        Commands::Rm { name } => cmd::cmd_remove(&manager, &name).await,
        Commands::Start { name } => cmd::cmd_start(&manager, &name).await,
        Commands::Stop { name } => cmd::cmd_stop(&manager, &name).await,
        Commands::Restart { name } => cmd::cmd_restart(&manager, &name).await,
        Commands::Startall => cmd::cmd_start_all(&manager).await,
        Commands::Stopall => cmd::cmd_stop_all(&manager).await,
        Commands::Restartall => cmd::cmd_restart_all(&manager).await,
        Commands::List => cmd::cmd_list(&manager).await,
        Commands::Prune => cmd::cmd_prune(&manager).await,
        Commands::Hooks => cmd::cmd_update_hooks(&manager).await,
        Commands::Config => cmd::cmd_config(&manager).await,
        Commands::Serve { port, dev } => cmd::cmd_serve(manager, port, dev).await,
    }
}
