use clap::{ArgAction, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tokenwarden::logging::{init_logging, LogLevel, LoggingConfig};
use tokenwarden::notification::NoticeRenderer;
use tokenwarden::{
    HttpRequest, Registration, RequestOptions, RequestRuntime, RuntimeConfig, RuntimeEvent,
};
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(name = "tokenwarden")]
#[command(version)]
#[command(about = "Authenticated HTTP calls with single-flight token refresh")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the persisted session [default: current directory]
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true, conflicts_with = "quiet")]
    verbose: u8,

    /// Only print errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Disable colors (also respects NO_COLOR environment variable)
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// GET a URL or a path relative to the configured base URL
    Get {
        url: String,

        /// Per-attempt timeout in milliseconds (0 disables)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },
    /// Log in and persist the session
    Login {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },
    /// Create an account, signing in if the server returns tokens
    Register {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        name: Option<String>,
    },
    /// End the persisted session
    Logout,
    /// Query the server's health endpoint
    Health,
    /// Show session state
    Status,
    /// Inspect the persisted error history
    Errors {
        #[command(subcommand)]
        command: ErrorsCommand,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand, Debug)]
enum ErrorsCommand {
    /// List the most recent failures, newest first
    List {
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
    /// Print failure statistics as JSON
    Stats,
    /// Delete the error history
    Clear,
}

/// Exit codes for the status command
mod exit_codes {
    use std::process::ExitCode;

    /// A session is present
    pub fn signed_in() -> ExitCode {
        ExitCode::from(0)
    }

    /// The command failed
    pub fn failed() -> ExitCode {
        ExitCode::from(1)
    }

    /// No session is present
    pub fn signed_out() -> ExitCode {
        ExitCode::from(77)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let use_color = !cli.no_color && std::env::var("NO_COLOR").is_err();

    let level = if cli.quiet {
        LogLevel::Error
    } else {
        LogLevel::from(cli.verbose)
    };
    init_logging(
        LoggingConfig::new()
            .with_level(level)
            .with_target(cli.verbose > 0)
            .with_ansi(use_color && std::io::stderr().is_terminal()),
    );

    match run(cli, use_color).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            exit_codes::failed()
        }
    }
}

async fn run(cli: Cli, use_color: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = RuntimeConfig::load(cli.config.as_deref())?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(dir) = cli.state_dir {
        config.state_dir = Some(dir);
    } else if config.state_dir.is_none() {
        config.state_dir = Some(std::env::current_dir()?);
    }

    let runtime = RequestRuntime::builder(config).build()?;
    let mut events = runtime.subscribe();
    let renderer = NoticeRenderer::new().with_colors(use_color && std::io::stderr().is_terminal());

    let outcome = dispatch(&runtime, cli.command).await;

    runtime.shutdown();
    if !cli.quiet {
        render_notices(&mut events, &renderer);
    }
    outcome
}

async fn dispatch(
    runtime: &RequestRuntime,
    command: Commands,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Get { url, timeout_ms } => {
            let url = runtime.config().endpoint(&url)?;
            let mut options = RequestOptions::default();
            if let Some(ms) = timeout_ms {
                options = options.with_timeout(Duration::from_millis(ms));
            }

            let response = runtime.send_with(HttpRequest::get(url), options).await?;
            println!("{}", response.text());
            if response.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("HTTP {}", response.status);
                Ok(exit_codes::failed())
            }
        }
        Commands::Login { email, password } => {
            runtime.login(&email, &password).await?;
            println!("Logged in as {}", email);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Register {
            email,
            password,
            name,
        } => {
            let mut registration = Registration::new(&email, password);
            if let Some(name) = name {
                registration = registration.with_name(name);
            }
            if runtime.register(&registration).await? {
                println!("Registered and logged in as {}", email);
            } else {
                println!("Registered {}", email);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => {
            let status = runtime.health().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Logout => {
            runtime.logout();
            println!("Logged out");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let ledger = runtime.ledger();
            println!("Base URL:      {}", runtime.config().base_url);
            println!(
                "Session:       {}",
                if runtime.is_authenticated() {
                    "authenticated"
                } else {
                    "signed out"
                }
            );
            if let Some(user) = runtime.current_user() {
                println!("User:          {}", user);
            }
            println!("Recorded errors: {}", ledger.len());
            if let Some(latest) = ledger.latest(1).first() {
                println!("Last error:    {}", latest);
            }

            if runtime.is_authenticated() {
                Ok(exit_codes::signed_in())
            } else {
                Ok(exit_codes::signed_out())
            }
        }
        Commands::Errors { command } => {
            let ledger = runtime.ledger();
            match command {
                ErrorsCommand::List { limit } => {
                    let entries = ledger.latest(limit);
                    if entries.is_empty() {
                        println!("No errors recorded");
                    }
                    for entry in entries {
                        println!(
                            "{}  {:<8}  {}",
                            entry.event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            entry.severity.as_str(),
                            entry.event
                        );
                    }
                }
                ErrorsCommand::Stats => {
                    println!("{}", serde_json::to_string_pretty(&ledger.stats())?);
                }
                ErrorsCommand::Clear => {
                    let count = ledger.len();
                    ledger.clear();
                    println!("Cleared {} errors", count);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => Ok(ExitCode::SUCCESS),
    }
}

/// Renders the notices published while the command ran.
fn render_notices(events: &mut broadcast::Receiver<RuntimeEvent>, renderer: &NoticeRenderer) {
    loop {
        match events.try_recv() {
            Ok(RuntimeEvent::Notice(notice)) => eprintln!("{}", renderer.render(&notice)),
            Ok(_) => continue,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "notices dropped");
            }
            Err(_) => break,
        }
    }
}
