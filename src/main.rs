//! scoutflow - checkpointed research workflows
//!
//! Usage:
//!   scoutflow run --criteria '{"location":"Austin, TX"}' --fixtures f.json   → start a session
//!   scoutflow resume -s alice-1 -c ckpt-... approve                           → answer a checkpoint
//!   scoutflow resume -s alice-1                                               → continue after a restart
//!   scoutflow state -s alice-1                                                → session snapshot
//!   scoutflow report -s alice-1                                               → rendered report
//!   scoutflow serve                                                           → HTTP gateway
//!   scoutflow init-config                                                     → write default config

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use scoutflow::{build_orchestrator, criteria_check, load_config, resolve_config_path};
use scoutflow_core::{Decision, ScoutflowConfig, SessionId, SessionState, SessionStatus};
use scoutflow_engine::{review_arguments, Orchestrator};
use scoutflow_gateway::{start_gateway, GatewayState};
use scoutflow_workers::{render_report_text, SearchCriteria};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "scoutflow",
    about = "Checkpointed multi-stage research workflows",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (TOML). Default: $SCOUTFLOW_CONFIG or ./scoutflow.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Capability fixture (JSON) serving search, extract, geocode, nearby and image calls
    #[arg(long, global = true, env = "SCOUTFLOW_FIXTURES")]
    fixtures: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session and run it until it suspends or finishes
    Run {
        /// Criteria as JSON, or @path to a JSON file
        #[arg(long)]
        criteria: String,
        /// Session id (default: {user}-{random})
        #[arg(short, long)]
        session: Option<String>,
        /// Owner of the session
        #[arg(short, long, default_value = "cli")]
        user: String,
        /// Approve every checkpoint as it comes up
        #[arg(long, default_value_t = false)]
        approve: bool,
    },
    /// Answer the pending checkpoint, or continue a running session
    Resume {
        #[arg(short, long)]
        session: String,
        /// Checkpoint to answer. Without it the session is recovered as is.
        #[arg(short, long)]
        checkpoint: Option<String>,
        #[arg(value_enum, default_value = "approve")]
        decision: DecisionArg,
        /// Entities to keep (implies an edit)
        #[arg(short, long = "entity")]
        entities: Vec<String>,
    },
    /// Print the session snapshot as JSON
    State {
        #[arg(short, long)]
        session: String,
    },
    /// Print the session report
    Report {
        #[arg(short, long)]
        session: String,
        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Compile again from the current store state
        #[arg(long, default_value_t = false)]
        recompile: bool,
    },
    /// Serve the HTTP gateway
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Write the default config file
    InitConfig {
        /// Destination (default: the resolved config path)
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionArg {
    Approve,
    Edit,
    Reject,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.json_logs, cli.log_file.as_deref())?;

    if let Commands::InitConfig { path, force } = &cli.command {
        return init_config(path.clone().unwrap_or_else(|| resolve_config_path(cli.config.as_deref())), *force);
    }

    let mut config = load_config(cli.config.as_deref());
    if let Commands::Serve { port, bind } = &cli.command {
        if let Some(port) = port {
            config.gateway.port = *port;
        }
        if let Some(bind) = bind {
            config.gateway.bind = bind.clone();
        }
    }
    let orchestrator = build_orchestrator(&config, cli.fixtures.as_deref()).await?;

    match cli.command {
        Commands::Run {
            criteria,
            session,
            user,
            approve,
        } => {
            let criteria = read_criteria(&criteria)?;
            SearchCriteria::from_value(&criteria)?;
            let id = SessionId::parse(session.unwrap_or_else(|| format!("{}-{}", user, uuid::Uuid::new_v4().simple())))?;
            let mut state = orchestrator.invoke(&id, Some(user.as_str()), criteria).await?;
            if approve {
                state = approve_all(&orchestrator, state).await?;
            }
            print_state(&state)?;
        }

        Commands::Resume {
            session,
            checkpoint,
            decision,
            entities,
        } => {
            let id = SessionId::parse(session)?;
            let state = match checkpoint {
                Some(checkpoint) => {
                    let decision = to_decision(decision, entities);
                    orchestrator.resume(&id, &checkpoint, decision).await?
                }
                None => orchestrator.recover(&id).await?,
            };
            print_state(&state)?;
        }

        Commands::State { session } => {
            print_state(&orchestrator.get_state(&SessionId::parse(session)?).await?)?;
        }

        Commands::Report {
            session,
            json,
            recompile,
        } => {
            let id = SessionId::parse(session)?;
            let report = if recompile {
                orchestrator.recompile(&id).await?
            } else {
                orchestrator
                    .get_state(&id)
                    .await?
                    .report
                    .ok_or_else(|| anyhow::anyhow!("session {} has no report yet", id))?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_report_text(&report));
            }
        }

        Commands::Serve { .. } => {
            let state = GatewayState::new(Arc::new(orchestrator)).with_criteria_check(criteria_check());
            start_gateway(state, &config.gateway).await?;
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn init_tracing(json: bool, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scoutflow=info,tower_http=info".into());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("--log-file needs a file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn init_config(path: PathBuf, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(&path, ScoutflowConfig::default().to_toml())
        .with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote default config to {}", path.display());
    Ok(())
}

fn read_criteria(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("criteria must be a JSON object")
}

fn to_decision(decision: DecisionArg, entities: Vec<String>) -> Decision {
    match decision {
        DecisionArg::Reject => Decision::Reject,
        DecisionArg::Approve if entities.is_empty() => Decision::Approve,
        DecisionArg::Approve | DecisionArg::Edit => Decision::Edit {
            new_arguments: review_arguments(&entities, vec![]),
        },
    }
}

async fn approve_all(orchestrator: &Orchestrator, mut state: SessionState) -> anyhow::Result<SessionState> {
    while state.status == SessionStatus::Suspended {
        let Some(checkpoint) = state.pending_checkpoint.clone() else {
            break;
        };
        info!(session = %state.session_id, checkpoint = %checkpoint.checkpoint_id, "auto-approving");
        state = orchestrator
            .resume(&state.session_id, &checkpoint.checkpoint_id, Decision::Approve)
            .await?;
    }
    Ok(state)
}

fn print_state(state: &SessionState) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(state)?);
    if let Some(checkpoint) = &state.pending_checkpoint {
        eprintln!(
            "\nSuspended at {}. Answer with:\n  scoutflow resume -s {} -c {} approve|edit|reject [-e <entity_id>...]",
            checkpoint.action_name, state.session_id, checkpoint.checkpoint_id
        );
    }
    Ok(())
}
