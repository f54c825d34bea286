use clap::{CommandFactory, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "doombreak-cli", version, about = "Doombreak CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed default site policies and install rules
    Init,
    /// Site policy management
    Sites {
        #[command(subcommand)]
        action: commands::sites::SitesAction,
    },
    /// Usage inspection and reporting
    Usage {
        #[command(subcommand)]
        action: commands::usage::UsageAction,
    },
    /// Compiled redirect rules
    Rules {
        #[command(subcommand)]
        action: commands::rules::RulesAction,
    },
    /// Policy verdict for a URL
    Status {
        /// Page URL to evaluate
        url: String,
    },
    /// Import companion-app state into the shared store
    Sync {
        /// Path to a JSON file holding the companion state
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Sites { action } => commands::sites::run(action),
        Commands::Usage { action } => commands::usage::run(action),
        Commands::Rules { action } => commands::rules::run(action),
        Commands::Status { url } => commands::status::run(&url),
        Commands::Sync { file } => commands::sync::run(&file),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "doombreak-cli", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
