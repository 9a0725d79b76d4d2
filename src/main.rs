use clap::{CommandFactory, Parser, Subcommand};
use parabot::config::Config;
use parabot::error::ParabotError;
use parabot::{logging, runtime, tools};
use parabot_remote::auth::GoogleAuth;
use parabot_remote::drive::DriveStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_ABOUT: &str = concat!(
    "\x1b[1mParabot v",
    env!("CARGO_PKG_VERSION"),
    "\x1b[22m\n",
    "Discord birthday reminders, backed by a SQLite file mirrored to Google Drive.\n",
    "\n",
    "\x1b[1mQuick Start:\x1b[22m\n",
    "  1) put credentials.json and token.json next to the binary\n",
    "  2) set DISCORD_TOKEN (and optionally DRIVE_FILE_ID) in .env\n",
    "  3) parabot start",
);

#[derive(Debug, Parser)]
#[command(name = "parabot", version = VERSION, about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Start the bot (default)
    Start,
    /// List database files in Google Drive and suggest DRIVE_FILE_ID
    FindDb {
        /// Search for names containing this text instead of ".sqlite"
        #[arg(long)]
        name: Option<String>,
    },
    /// Fold credentials.json, token.json and .env into one env file for deployment
    PrepareDeploy {
        #[arg(long, default_value = ".env.deploy")]
        output: PathBuf,
    },
    /// Show version
    Version,
}

fn print_version() {
    println!("parabot {VERSION}");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    match &config.log_dir {
        Some(dir) => logging::init_logging(Path::new(dir)),
        None => {
            logging::init_console_logging();
            Ok(())
        }
    }
}

async fn find_db(name: Option<String>) -> anyhow::Result<()> {
    let config = Config::load_without_bot()?;
    let auth = GoogleAuth::load(&config.credentials_source(), &config.token_source())?;
    let store = DriveStore::new(Arc::new(auth))?;

    match name.as_deref() {
        Some(term) => println!("Searching Google Drive for \"{term}\"...\n"),
        None => println!("Searching Google Drive for .sqlite files...\n"),
    }
    let found = tools::find_database_files(&store, name.as_deref()).await?;
    print!("{}", tools::render_found_files(&found));

    if config.drive_file_id.is_none() {
        let exact = tools::exact_matches(&store, &config.db_file_name).await?;
        if exact > 1 {
            println!(
                "\nWarning: {exact} files are named '{}'; \
                 startup picks whichever Drive lists first.",
                config.db_file_name
            );
        }
    }
    Ok(())
}

fn prepare_deploy(output: PathBuf) -> anyhow::Result<()> {
    let config = Config::load_without_bot()?;
    let inputs = tools::DeployInputs {
        credentials_path: Path::new(&config.credentials_path),
        token_path: Path::new(&config.token_path),
        env_path: Path::new(".env"),
        output_path: &output,
        gitignore_path: Path::new(".gitignore"),
    };
    let added = tools::prepare_deploy(&inputs)?;
    println!("Wrote {}", output.display());
    if !added.is_empty() {
        println!(".gitignore updated: {}", added.join(", "));
    }
    println!("Copy its contents into your host's environment settings. Never commit it.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(MainCommand::Start) | None => {}
        Some(MainCommand::FindDb { name }) => return find_db(name).await,
        Some(MainCommand::PrepareDeploy { output }) => return prepare_deploy(output),
        Some(MainCommand::Version) => {
            print_version();
            return Ok(());
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(ParabotError::Config(e)) => {
            eprintln!("Config missing/invalid: {e}");
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            return Err(anyhow::anyhow!("invalid configuration"));
        }
        Err(e) => return Err(e.into()),
    };
    init_logging(&config)?;
    info!("Starting Parabot v{VERSION}...");

    log_fatal(runtime::run(config).await)
}

/// Record why the process is exiting in the log before `main` returns it.
fn log_fatal(result: anyhow::Result<()>) -> anyhow::Result<()> {
    if let Err(e) = &result {
        error!("Fatal: {e:#}");
    }
    result
}
