mod inspect;
mod run;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "instacmd", about = "Discord bot with commands and listeners added at runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and serve stored snippets
    Run,
    /// List stored snippets
    List {
        /// List dev values instead of commands and listeners
        #[arg(long)]
        env: bool,
    },
    /// Print the stored source of a snippet
    Source {
        /// Command, listener or dev value name
        name: String,

        /// Look the name up among dev values
        #[arg(long)]
        env: bool,
    },
    /// Compile a snippet file and report what it would register, without storing it
    Check {
        /// Path to the snippet source
        file: PathBuf,

        /// Check the file as the dev value with this name
        #[arg(long, value_name = "NAME")]
        env: Option<String>,
    },
    /// Show version and resolved paths
    Info,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = instacmd_config::load_config().context("Failed to load configuration")?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Run => rt.block_on(run::run_bot(config))?,
        Commands::List { env } => rt.block_on(inspect::list(&config, env))?,
        Commands::Source { name, env } => rt.block_on(inspect::source(&config, &name, env))?,
        Commands::Check { file, env } => {
            let summary = rt.block_on(inspect::check(&config, &file, env))?;
            println!("{summary}");
        }
        Commands::Info => inspect::info(&config)?,
    }

    Ok(())
}
