mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Session, EXIT_DESIRED_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "stratus",
    version,
    about = "Declarative reconciliation of virtual datacenter resources"
)]
struct Cli {
    /// Path to the state directory.
    #[arg(long, default_value = "~/.local/share/stratus", global = true)]
    store: String,

    /// Reconciliation settings (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sandbox platform snapshot used as the remote side. Defaults to
    /// `sandbox.json` inside the state directory.
    #[arg(long, global = true)]
    sandbox: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

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
    /// Show the operations needed to reach the desired state.
    Plan {
        /// Desired resources (TOML).
        desired: PathBuf,
    },
    /// Reconcile every resource of a desired file.
    Apply {
        /// Desired resources (TOML).
        desired: PathBuf,
        /// Re-create objects that vanished from the platform.
        #[arg(long, default_value_t = false)]
        allow_recreate: bool,
    },
    /// Re-read the remote object of an instance and report drift.
    Refresh {
        /// Instance key.
        key: String,
    },
    /// Delete the remote object of an instance and forget it.
    Destroy {
        /// Instance key.
        key: String,
        /// Delete regardless of the object's current state.
        #[arg(long, required = true, action = clap::ArgAction::Set)]
        force: bool,
        /// Also delete contained objects.
        #[arg(long, required = true, action = clap::ArgAction::Set)]
        recursive: bool,
    },
    /// Adopt an existing remote object by its import path.
    Import {
        /// Desired resources (TOML) holding the entry for `key`.
        desired: PathBuf,
        /// Instance key.
        key: String,
        /// Ancestor names and the object name, e.g. `acme.main.web`.
        path: String,
    },
    /// Show lifecycle state and last error of instances.
    Status {
        /// Instance key; all instances when omitted.
        key: Option<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
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
            tracing_subscriber::EnvFilter::try_from_env("STRATUS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let store_path = expand_tilde(&cli.store);
    let sandbox_path = cli
        .sandbox
        .unwrap_or_else(|| store_path.join("sandbox.json"));
    let json = cli.json;

    let result = match cli.command {
        // Completions never touch the state directory.
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => Session::open(&store_path, cli.config.as_deref(), &sandbox_path)
            .and_then(|session| dispatch(&session, &command, json)),
    };
    exit_code(result)
}

fn dispatch(session: &Session, command: &Commands, json: bool) -> Result<u8, String> {
    match command {
        Commands::Plan { desired } => commands::plan::run(session, desired, json),
        Commands::Apply {
            desired,
            allow_recreate,
        } => commands::apply::run(session, desired, *allow_recreate, json),
        Commands::Refresh { key } => commands::refresh::run(session, key, json),
        Commands::Destroy {
            key,
            force,
            recursive,
        } => commands::destroy::run(session, key, *force, *recursive, json),
        Commands::Import { desired, key, path } => {
            commands::import::run(session, desired, key, path, json)
        }
        Commands::Status { key } => commands::status::run(session, key.as_deref(), json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
    }
}

fn exit_code(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("desired state error:")
                || msg.starts_with("schema error:")
                || msg.starts_with("config error:")
            {
                EXIT_DESIRED_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
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
