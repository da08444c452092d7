use anyhow::{Context, Result};
use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::InputError;
use crate::policy::{exponential_wait, JITTER_RATIO};

pub const DEFAULT_BASE_WAIT_SECS: f64 = 1.0;
pub const DEFAULT_CLIENTS: u32 = 100;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const MAX_ATTEMPTS_RANGE: (u32, u32) = (1, 10);

/// Animation pace. The multiplier scales every pause of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl Speed {
    pub fn multiplier(&self) -> f64 {
        match self {
            Speed::Slow => 2.0,
            Speed::Normal => 1.0,
            Speed::Fast => 0.5,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow" => Some(Speed::Slow),
            "normal" => Some(Speed::Normal),
            "fast" => Some(Speed::Fast),
            _ => None,
        }
    }
}

/// Parameters of one run. Immutable once the run starts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SimulationConfig {
    pub base_wait_secs: f64,
    pub clients: u32,
    pub max_attempts: u32,
    pub speed: Speed,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_wait_secs: DEFAULT_BASE_WAIT_SECS,
            clients: DEFAULT_CLIENTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            speed: Speed::Normal,
        }
    }
}

impl SimulationConfig {
    /// Validates raw user input.
    ///
    /// Any malformed field replaces all three numeric fields with their
    /// defaults; the error is handed back so the caller can report it.
    /// `max_attempts` is clamped into `[1, 10]` either way.
    pub fn from_input(
        base_wait: &str,
        clients: &str,
        max_attempts: &str,
        speed: Speed,
    ) -> (Self, Option<InputError>) {
        match Self::parse_fields(base_wait, clients, max_attempts) {
            Ok((base_wait_secs, clients, max_attempts)) => (
                Self {
                    base_wait_secs,
                    clients,
                    max_attempts: clamp_attempts(max_attempts),
                    speed,
                },
                None,
            ),
            Err(err) => (
                Self {
                    speed,
                    ..Self::default()
                },
                Some(err),
            ),
        }
    }

    fn parse_fields(base_wait: &str, clients: &str, max_attempts: &str) -> Result<(f64, u32, i64), InputError> {
        let bw = base_wait
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| *v > 0.0 && longest_wait_secs(*v).is_finite())
            .ok_or_else(|| InputError::BaseWait(base_wait.to_string()))?;
        let cl = clients
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| InputError::Clients(clients.to_string()))?;
        let ma = max_attempts
            .trim()
            .parse::<i64>()
            .map_err(|_| InputError::MaxAttempts(max_attempts.to_string()))?;
        Ok((bw, cl, ma))
    }
}

/// Longest wait any scenario can draw from `base`: the last allowed attempt
/// plus the full jitter spread.
fn longest_wait_secs(base: f64) -> f64 {
    exponential_wait(base, MAX_ATTEMPTS_RANGE.1 - 1) * (1.0 + JITTER_RATIO)
}

fn clamp_attempts(n: i64) -> u32 {
    let (lo, hi) = MAX_ATTEMPTS_RANGE;
    n.clamp(lo as i64, hi as i64) as u32
}

/// Persisted run defaults.
///
/// Values stay textual until [`Config::simulation`] validates them, so a bad
/// value in the file or environment takes the same fallback path as a bad flag.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_wait: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<Speed>,
}

/// Keys accepted by `config set/get`.
pub const CONFIG_KEYS: [&str; 4] = ["base_wait", "clients", "max_attempts", "speed"];

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let data = fs::read_to_string(path).context("read config file")?;
            if data.trim().is_empty() {
                return Ok(Config::default());
            }
            let cfg: Config = serde_yaml::from_str(&data).context("parse config yaml")?;
            debug!(path = %path.display(), "loaded config");
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("create config dir")?;
        }
        let data = serde_yaml::to_string(&self).context("serialize config")?;
        let mut f = fs::File::create(path).context("create config file")?;
        f.write_all(data.as_bytes()).context("write config file")?;
        Ok(())
    }

    /// `RETRYSIM_CONFIG` if set, else `<config dir>/retrysim/config.yaml`.
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(p) = std::env::var("RETRYSIM_CONFIG") {
            if !p.is_empty() {
                return Ok(PathBuf::from(p));
            }
        }
        let proj = ProjectDirs::from("", "", "retrysim").context("resolve config dir")?;
        Ok(proj.config_dir().join("config.yaml"))
    }

    pub fn apply_env(&mut self) {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        if let Some(v) = var("RETRYSIM_BASE_WAIT") {
            self.base_wait = Some(v);
        }
        if let Some(v) = var("RETRYSIM_CLIENTS") {
            self.clients = Some(v);
        }
        if let Some(v) = var("RETRYSIM_MAX_ATTEMPTS") {
            self.max_attempts = Some(v);
        }
        if let Some(speed) = var("RETRYSIM_SPEED").as_deref().and_then(Speed::parse) {
            self.speed = Some(speed);
        }
    }

    pub fn apply_run_args(&mut self, args: &crate::cli::RunArgs) {
        if let Some(v) = args.base_wait.clone() {
            self.base_wait = Some(v);
        }
        if let Some(v) = args.clients.clone() {
            self.clients = Some(v);
        }
        if let Some(v) = args.max_attempts.clone() {
            self.max_attempts = Some(v);
        }
        if let Some(speed) = args.speed {
            self.speed = Some(speed);
        }
    }

    pub fn simulation(&self) -> (SimulationConfig, Option<InputError>) {
        let base_wait = self
            .base_wait
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_WAIT_SECS.to_string());
        let clients = self.clients.clone().unwrap_or_else(|| DEFAULT_CLIENTS.to_string());
        let max_attempts = self
            .max_attempts
            .clone()
            .unwrap_or_else(|| DEFAULT_MAX_ATTEMPTS.to_string());
        SimulationConfig::from_input(&base_wait, &clients, &max_attempts, self.speed.unwrap_or_default())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "base_wait" => self.base_wait = Some(value.to_string()),
            "clients" => self.clients = Some(value.to_string()),
            "max_attempts" => self.max_attempts = Some(value.to_string()),
            "speed" => {
                let speed = Speed::parse(value)
                    .with_context(|| format!("unsupported speed {value:?}; expected slow, normal or fast"))?;
                self.speed = Some(speed);
            }
            _ => anyhow::bail!("unsupported key {key:?}; expected one of {}", CONFIG_KEYS.join(", ")),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String> {
        let v = match key {
            "base_wait" => self.base_wait.clone(),
            "clients" => self.clients.clone(),
            "max_attempts" => self.max_attempts.clone(),
            "speed" => self.speed.map(|s| format!("{s:?}").to_ascii_lowercase()),
            _ => anyhow::bail!("unsupported key {key:?}; expected one of {}", CONFIG_KEYS.join(", ")),
        };
        Ok(v.unwrap_or_default())
    }
}
