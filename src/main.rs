//! pendant-link CLI - drive and observe a robot arm from the terminal.
//!
//! This is the main binary entry point. See the `pendant_link` library
//! for the core functionality.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mimalloc::MiMalloc;
use pendant_link::{commands, Config};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "pendant-link")]
#[command(version)]
#[command(about = "Command/telemetry link to a robot-arm control backend")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that win over the config file and `PENDANT_*` variables.
#[derive(Args)]
struct Overrides {
    /// Backend HTTP base URL
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Explicit WebSocket URL (default: derived from --server-url)
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Reconnection attempts before giving up
    #[arg(long, global = true)]
    max_reconnect_attempts: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print telemetry until Ctrl-C
    Watch {
        /// Only show messages of this type (repeatable)
        #[arg(long = "type", value_name = "TYPE")]
        kinds: Vec<String>,
    },
    /// Send one jog increment
    Jog {
        /// Joint to move (joint mode)
        #[arg(long, conflicts_with = "axis", required_unless_present = "axis")]
        joint: Option<String>,
        /// Cartesian axis to move (x, y, z, roll, pitch, yaw)
        #[arg(long)]
        axis: Option<String>,
        /// 1 or -1
        #[arg(long, allow_negative_numbers = true, value_parser = parse_direction)]
        direction: i8,
        /// Step size in degrees or mm
        #[arg(long, default_value_t = 5.0)]
        increment: f64,
    },
    /// Stop continuous jogging
    Stop,
    /// Show current joint and end-effector positions
    Position,
    /// Trigger the emergency stop
    Estop,
    /// Move to the home pose
    Home,
    /// List stored programs, or show one program's steps
    Programs {
        /// Program id to show in full
        id: Option<String>,
        /// Also list saved positions
        #[arg(long, conflicts_with = "id")]
        positions: bool,
    },
    /// Execute a stored program
    RunProgram {
        /// Program id
        id: String,
    },
}

fn parse_direction(raw: &str) -> Result<i8, String> {
    match raw {
        "1" | "+1" => Ok(1),
        "-1" => Ok(-1),
        other => Err(format!("direction must be 1 or -1, got {other}")),
    }
}

fn load_config(overrides: Overrides) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(server_url) = overrides.server_url {
        config.server_url = server_url;
    }
    if let Some(endpoint) = overrides.endpoint {
        config.endpoint = Some(endpoint);
    }
    if let Some(max) = overrides.max_reconnect_attempts {
        config.max_reconnect_attempts = max;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for telemetry output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.overrides)?;
    log::debug!("Using backend {} ({})", config.server_url, config.endpoint());

    match cli.command {
        Commands::Watch { kinds } => commands::watch(&config, &kinds).await,
        Commands::Jog {
            joint,
            axis,
            direction,
            increment,
        } => commands::jog(&config, joint.as_deref(), axis.as_deref(), direction, increment).await,
        Commands::Stop => commands::jog_stop(&config).await,
        Commands::Position => commands::position(&config).await,
        Commands::Estop => commands::emergency_stop(&config).await,
        Commands::Home => commands::home(&config).await,
        Commands::Programs { id, positions } => match id {
            Some(id) => commands::show_program(&config, &id).await,
            None => commands::list_programs(&config, positions).await,
        },
        Commands::RunProgram { id } => commands::run_program(&config, &id).await,
    }
}
