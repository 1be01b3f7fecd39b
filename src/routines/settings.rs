use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::distribution::DistributionFamily;
use crate::structs::parameters::{Bounds, FittableMask, Parameters};

/// Configuration bundle for one fitting run.
///
/// The core defines no default parameter values, bounds or mask; those are a
/// concern of the calling application and arrive either through
/// [read_settings] or by constructing this bundle directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub fit: FitSettings,
    pub model: ModelSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSettings {
    /// Initial parameter estimates; locked parameters keep these values
    pub parameters: Parameters,
    pub bounds: Bounds,
    pub fittable: FittableMask,
    /// Base seed for the per-restart random streams
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of randomized restarts
    pub iter_search: usize,
    /// Function-evaluation budget handed to the minimizer
    pub max_nfev: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Time step of the model grid, in hours
    pub dt: f64,
    #[serde(default = "default_family")]
    pub family: DistributionFamily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; stdout is always used
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Read a [Settings] bundle from a TOML file, with environment variable
/// overrides under the `CYTON` prefix.
pub fn read_settings(path: &str) -> Result<Settings> {
    let parsed = config::Config::builder()
        .add_source(config::File::with_name(path).format(config::FileFormat::Toml))
        .add_source(config::Environment::with_prefix("CYTON").separator("_"))
        .build()
        .with_context(|| format!("failed to read settings from {}", path))?;

    let settings: Settings = parsed
        .try_deserialize()
        .context("settings file did not match the expected schema")?;
    settings.fit.bounds.validate()?;
    Ok(settings)
}

// *********************************
// Default values for deserializing
// *********************************
fn default_seed() -> u64 {
    894375982
}

fn default_family() -> DistributionFamily {
    DistributionFamily::LogNormal
}

fn default_log_level() -> String {
    "info".to_string()
}
