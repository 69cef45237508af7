use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use slowmode::config::{Scope, SlowmodeConfig};
use slowmode::ratelimit::header;
use slowmode::replay::Scenario;

#[derive(Debug, Parser)]
#[command(name = "slowmode", version, about = "Try out channel slow mode settings")]
struct Cli {
    /// Plugin settings file (YAML); SLOWMODE_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured scope
    #[arg(long, global = true, value_enum)]
    scope: Option<ScopeArg>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a scenario file and print one JSON outcome per event
    Replay {
        /// Scenario file (YAML)
        scenario: PathBuf,
    },
    /// Show the post limit a channel header resolves to
    Header {
        /// Channel header text
        text: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    PerChannel,
    Global,
}

impl From<ScopeArg> for Scope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::PerChannel => Scope::PerChannel,
            ScopeArg::Global => Scope::Global,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut config = SlowmodeConfig::load(cli.config.as_deref())?;
    if let Some(scope) = cli.scope {
        config.scope = scope.into();
    }
    info!(scope = ?config.scope, default_post_limit = %config.default_post_limit, "Configuration loaded");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Replay { scenario } => {
            let scenario = Scenario::from_file(&scenario)?;
            let outcomes = scenario.replay(config)?;
            for outcome in &outcomes {
                serde_json::to_writer(&mut out, outcome)?;
                writeln!(out)?;
            }
            info!(events = outcomes.len(), "Replay finished");
        }
        Command::Header { text } => {
            let limit = header::resolve_header("cli", &text, config.default_interval()?);
            let report = serde_json::json!({
                "interval_ms": limit.interval.as_millis() as u64,
                "source": limit.source,
            });
            writeln!(out, "{}", report)?;
        }
    }

    Ok(())
}
