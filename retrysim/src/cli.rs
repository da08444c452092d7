use crate::config::{Config, Speed};
use crate::driver::{Pacer, RunContext};
use crate::model::{
    base_failure_rate, failure_probability, server_load_percent, RandomSource, RngSource, SERVER_CAPACITY,
};
use crate::output::{emit_data, OutputFormat, Renderer};
use crate::scenario::Scenario;
use crate::session::Session;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value as JsonValue;
use std::io::IsTerminal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "retrysim",
    about = "Retry back-off simulator",
    disable_help_subcommand = true,
    after_help = r#"Examples:
  retrysim run
  retrysim run with-backoff --base-wait 0.5 --max-attempts 6
  retrysim run graph --max-attempts 8 --instant --json
  retrysim model --clients 150
  RETRYSIM_SPEED=fast retrysim run with-jitter"#
)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// JSON output (one object per event)
    #[arg(long, global = true, conflicts_with = "yaml")]
    pub json: bool,
    /// YAML output (final report only)
    #[arg(long, global = true)]
    pub yaml: bool,
    /// Verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,
    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,
    /// Color control
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorChoice>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ColorChoice {
    Always,
    Auto,
    Never,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scenario
    Run(RunArgs),
    /// List the available scenarios
    Scenarios,
    /// Show the load and failure model for a client count
    Model(ModelArgs),
    Config(ConfigCmd),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(value_enum, default_value_t = Scenario::Comparison)]
    pub scenario: Scenario,
    /// Base wait in seconds
    #[arg(long = "base-wait", allow_hyphen_values = true)]
    pub base_wait: Option<String>,
    /// Number of simulated clients
    #[arg(long, allow_hyphen_values = true)]
    pub clients: Option<String>,
    /// Attempts per lane, clamped to 1..=10
    #[arg(long = "max-attempts", allow_hyphen_values = true)]
    pub max_attempts: Option<String>,
    #[arg(long, value_enum)]
    pub speed: Option<Speed>,
    /// Seed the random source for a reproducible run
    #[arg(long)]
    pub seed: Option<u64>,
    /// Skip all pauses
    #[arg(long)]
    pub instant: bool,
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    #[arg(long, default_value_t = crate::config::DEFAULT_CLIENTS)]
    pub clients: u32,
    /// Added to the base failure rate before clamping
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub adjustment: f64,
}

#[derive(Args, Debug)]
pub struct ConfigCmd {
    #[command(subcommand)]
    sub: ConfigSub,
}
#[derive(Subcommand, Debug)]
pub enum ConfigSub {
    Set { key: String, value: String },
    Get { key: String },
    Path,
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut cfg = Config::load().context("load config")?;
    cfg.apply_env();

    match &cli.command {
        Commands::Run(args) => {
            cfg.apply_run_args(args);
            run_scenario(args, cfg, &cli).await
        }
        Commands::Scenarios => run_scenarios(&cli),
        Commands::Model(args) => run_model(args, &cli),
        Commands::Config(cmd) => run_config(cmd, &cfg),
    }
}

fn fmt_from_cli(cli: &Cli) -> OutputFormat {
    if cli.json {
        OutputFormat::Json
    } else if cli.yaml {
        OutputFormat::Yaml
    } else {
        OutputFormat::Text
    }
}

/// Whether narrated output on stdout should carry ANSI colors.
pub fn color_enabled(choice: Option<&ColorChoice>) -> bool {
    match choice {
        Some(ColorChoice::Always) => true,
        Some(ColorChoice::Never) => false,
        _ => std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal(),
    }
}

async fn run_scenario(args: &RunArgs, cfg: Config, cli: &Cli) -> Result<()> {
    let (config, input_error) = cfg.simulation();
    let ctx = RunContext::new(args.scenario, config).with_input_error(input_error);

    let source: Box<dyn RandomSource> = match args.seed {
        Some(seed) => Box::new(RngSource::seeded(seed)),
        None => Box::new(RngSource::from_entropy()),
    };
    let pacer = if args.instant {
        Pacer::instant()
    } else {
        Pacer::new(config.speed)
    };

    let mut renderer = Renderer::stdout(fmt_from_cli(cli), color_enabled(cli.color.as_ref()));
    let mut session = Session::new(pacer);
    let mut events = session.start(ctx, source)?;

    let mut interrupted = false;
    loop {
        tokio::select! {
            ev = events.recv() => match ev {
                Some(ev) => renderer.event(&ev)?,
                None => break,
            },
            res = tokio::signal::ctrl_c(), if !interrupted => {
                res.context("listen for ctrl-c")?;
                info!("interrupt received, stopping run");
                interrupted = true;
                // the worker may already be winding down
                let _ = session.stop();
            }
        }
    }

    let report = session.wait().await?;
    renderer.finish(&report)?;
    Ok(())
}

fn run_scenarios(cli: &Cli) -> Result<()> {
    let list: Vec<JsonValue> = Scenario::ALL
        .iter()
        .map(|s| {
            serde_json::json!({
                "id": s.id(),
                "label": s.label(),
                "description": s.description(),
            })
        })
        .collect();
    emit_data(&fmt_from_cli(cli), &JsonValue::Array(list))
}

fn run_model(args: &ModelArgs, cli: &Cli) -> Result<()> {
    let ratio = args.clients as f64 / SERVER_CAPACITY as f64;
    let buckets: Vec<JsonValue> = [
        ("<= 0.5", 0.5),
        ("<= 1.0", 1.0),
        ("<= 2.0", 2.0),
        ("<= 4.0", 4.0),
        ("> 4.0", f64::INFINITY),
    ]
    .iter()
    .map(|(range, upper)| serde_json::json!({ "load_ratio": range, "failure_rate": base_failure_rate(*upper) }))
    .collect();
    let data = serde_json::json!({
        "clients": args.clients,
        "capacity": SERVER_CAPACITY,
        "load_ratio": ratio,
        "server_load": server_load_percent(args.clients, SERVER_CAPACITY),
        "base_failure_rate": base_failure_rate(ratio),
        "adjustment": args.adjustment,
        "failure_probability": failure_probability(args.clients, SERVER_CAPACITY, args.adjustment),
        "buckets": buckets,
    });
    emit_data(&fmt_from_cli(cli), &data)
}

fn run_config(cmd: &ConfigCmd, cfg: &Config) -> Result<()> {
    match &cmd.sub {
        ConfigSub::Set { key, value } => {
            // env overrides must not leak into the saved file
            let mut stored = Config::load().context("load config")?;
            stored.set(key, value)?;
            stored.save()?;
            emit_data(&OutputFormat::Yaml, &serde_json::json!({"status": "ok"}))
        }
        ConfigSub::Get { key } => {
            let v = cfg.get(key)?;
            emit_data(&OutputFormat::Raw, &JsonValue::String(v))
        }
        ConfigSub::Path => {
            let path = Config::config_path()?;
            emit_data(&OutputFormat::Raw, &JsonValue::String(path.display().to_string()))
        }
    }
}
