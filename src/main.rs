#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use robot_taskd::channels::{CommandRouter, Inbound};
use robot_taskd::config::{self, Config};
use robot_taskd::engine::{CommandDispatcher, RecordingSink};
use robot_taskd::ConfigCommands;

/// `robot-taskd` - sequential task executor for a mobile manipulator.
#[derive(Parser, Debug)]
#[command(name = "robot-taskd")]
#[command(version)]
#[command(about = "Queue navigation, arm and gripper commands and run them one at a time.", long_about = None)]
struct Cli {
    /// Directory holding config.toml (overrides ROBOT_TASKD_CONFIG_DIR)
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the broker and execute tasks until Ctrl+C
    Run {
        /// Broker URL override, e.g. mqtt://10.0.0.5:1883
        #[arg(long)]
        broker_url: Option<String>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Parse a message offline and show what the daemon would do with it
    #[command(long_about = "\
Parse a message offline and show what the daemon would do with it.

Nothing is queued or published. For command topics the actuator message \
that would be sent is printed.

Examples:
  robot-taskd check robot/navigation '{\"x\":1.0,\"y\":2.0,\"yaw\":1.57}'
  robot-taskd check robot/gripper/control '{\"command\":1}'
  robot-taskd check robot/queue/control '{\"action\":\"resume\"}'")]
    Check {
        /// Inbound topic the payload would arrive on
        topic: String,
        /// JSON payload
        payload: String,
    },

    /// Show the state last written by a running daemon
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match &cli.config_dir {
        Some(dir) if dir.trim().is_empty() => bail!("--config-dir cannot be empty"),
        Some(dir) => Some(PathBuf::from(dir)),
        None => None,
    };

    // Schema output must stay clean JSON: no config load, no logging.
    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        return print_schema();
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = Config::load_or_init(config_dir.as_deref()).await?;

    match cli.command {
        Commands::Run { broker_url } => {
            if let Some(url) = broker_url {
                config.mqtt.use_tls = url.starts_with("mqtts://");
                config.mqtt.broker_url = url;
                config.validate()?;
            }
            robot_taskd::daemon::run(config).await
        }

        Commands::Config { config_command } => match config_command {
            ConfigCommands::Show => {
                let rendered = toml::to_string_pretty(&config.redacted())
                    .context("failed to render config")?;
                println!("# {}", config.config_path.display());
                println!("{rendered}");
                Ok(())
            }
            ConfigCommands::Path => {
                println!("{}", config.config_path.display());
                Ok(())
            }
            ConfigCommands::Schema => print_schema(),
        },

        Commands::Check { topic, payload } => check(&config, &topic, &payload),

        Commands::Status => {
            let path = robot_taskd::daemon::state_file_path(&config);
            let state = robot_taskd::daemon::read_state(&path).await?;
            print_status(&state);
            Ok(())
        }
    }
}

fn print_schema() -> Result<()> {
    let schema = config::json_schema();
    println!(
        "{}",
        serde_json::to_string_pretty(&schema).context("failed to serialize JSON Schema")?
    );
    Ok(())
}

fn check(config: &Config, topic: &str, payload: &str) -> Result<()> {
    let router = CommandRouter::new(&config.topics);
    let dispatcher = CommandDispatcher::new(
        Arc::new(RecordingSink::new()),
        config.topics.actuator_topics(),
        config.engine.frame_id.clone(),
    );

    let preview = router
        .preview(&dispatcher, topic, payload.as_bytes())
        .map_err(|e| anyhow::anyhow!("❌ Rejected: {e}"))?;

    match preview.inbound {
        Inbound::Command(command) => println!("✅ Task: {command}"),
        Inbound::NavStatus(code) => println!("✅ Navigation status code {code}"),
        Inbound::ArmRunning(running) => println!("✅ Arm running: {running}"),
        Inbound::Control(control) => println!("✅ Queue control: {control:?}"),
    }
    if let Some(outbound) = preview.outbound {
        println!("   Publish → {}", outbound.topic);
        println!("   {}", outbound.payload_str());
    }
    Ok(())
}

fn print_status(state: &serde_json::Value) {
    let engine = &state["engine"];
    println!("🤖 robot-taskd status");
    println!();
    println!(
        "Written at:  {}",
        state["written_at"].as_str().unwrap_or("unknown")
    );
    println!("PID:         {}", state["pid"]);
    println!("Paused:      {}", engine["paused"]);
    println!("Pending:     {}", engine["pending"]);
    match engine["current"].as_object() {
        Some(current) => println!(
            "Current:     #{} {} ({:.1}s in flight)",
            current.get("id").unwrap_or(&serde_json::Value::Null),
            current
                .get("kind")
                .and_then(|kind| kind.as_str())
                .unwrap_or("?"),
            current
                .get("in_flight_secs")
                .and_then(|secs| secs.as_f64())
                .unwrap_or_default()
        ),
        None => println!("Current:     (idle)"),
    }
    println!(
        "Navigation:  {} ({})",
        engine["nav_status"],
        engine["nav_status_label"].as_str().unwrap_or("unknown")
    );
    println!("Arm running: {}", engine["arm_running"]);
    println!(
        "Completed:   {}  Faulted: {}",
        engine["completed"], engine["faulted"]
    );

    if let Some(components) = state["components"].as_object() {
        println!();
        println!("Components:");
        for (name, component) in components {
            let status = component["status"].as_str().unwrap_or("unknown");
            let marker = if status == "ok" { "✅" } else { "❌" };
            print!("  {marker} {name:<10} {status}");
            if let Some(err) = component["last_error"].as_str() {
                print!(" ({err})");
            }
            println!();
        }
    }
}
