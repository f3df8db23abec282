use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
    /// Empty means the backend's default interface.
    #[serde(default)]
    pub network_interface: String,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub backend: BackendChoice,
    /// Pins the CPU fan as `chip/label` (OS backend), e.g. `nct6775/fan2`.
    #[serde(default)]
    pub cpu_fan: Option<String>,
    #[serde(default = "default_lhm_namespace")]
    pub lhm_namespace: String,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Auto,
    Lhm,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            network_interface: String::new(),
            output_path: default_output_path(),
            output_format: OutputFormat::default(),
            backend: BackendChoice::default(),
            cpu_fan: None,
            lhm_namespace: default_lhm_namespace(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match Duration::try_from_secs_f64(self.interval_secs) {
            Ok(interval) if !interval.is_zero() => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "interval_secs must be a positive number of seconds, got {}",
                    self.interval_secs
                )));
            }
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "output_path must not be empty".to_string(),
            ));
        }
        if self.output_path.file_name().is_none() {
            return Err(ConfigError::Validation(format!(
                "output_path '{}' must name a file",
                self.output_path.display()
            )));
        }
        if let Some(fan) = &self.cpu_fan {
            if !fan.contains('/') {
                return Err(ConfigError::Validation(format!(
                    "cpu_fan '{fan}' must have the form chip/label"
                )));
            }
        }
        if self.lhm_namespace.trim().is_empty() {
            return Err(ConfigError::Validation(
                "lhm_namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Falls back to the default period for a value `validate` would reject.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_interval_secs()))
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

const fn default_interval_secs() -> f64 {
    0.5
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./hardware-stats.yaml")
}

fn default_lhm_namespace() -> String {
    "root/LibreHardwareMonitor".to_string()
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("default config must validate");
        assert_eq!(cfg.interval(), Duration::from_millis(500));
        assert!(cfg.network_interface.is_empty());
    }

    #[test]
    fn bundled_example_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example must parse");
        cfg.validate().expect("example must validate");
    }

    #[test]
    fn partial_file_takes_defaults() {
        let cfg: Config = serde_yaml::from_str("interval_secs: 2\nbackend: system\n").unwrap();
        assert_eq!(cfg.interval_secs, 2.0);
        assert_eq!(cfg.backend, BackendChoice::System);
        assert_eq!(cfg.output_path, PathBuf::from("./hardware-stats.yaml"));
        assert_eq!(cfg.output_format, OutputFormat::Yaml);
    }

    #[test]
    fn rejects_non_positive_interval() {
        let mut cfg = Config::default();
        cfg.interval_secs = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
        cfg.interval_secs = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_interval_outside_duration_range() {
        let mut cfg = Config::default();
        for secs in [1e20, f64::INFINITY, -1.0, 1e-12] {
            cfg.interval_secs = secs;
            assert!(
                matches!(cfg.validate(), Err(ConfigError::Validation(_))),
                "{secs} accepted"
            );
            // Never panics, even on a config that skipped validation.
            assert_eq!(cfg.interval(), Duration::from_millis(500));
        }

        cfg.interval_secs = 86_400.0;
        cfg.validate().expect("one day is a valid interval");
        assert_eq!(cfg.interval(), Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_malformed_cpu_fan() {
        let mut cfg = Config::default();
        cfg.cpu_fan = Some("fan2".to_string());
        assert!(cfg.validate().is_err());
        cfg.cpu_fan = Some("nct6775/fan2".to_string());
        cfg.validate().expect("chip/label is accepted");
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from_file(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "interval_secs: 0.25\nnetwork_interface: eth0\noutput_format: json\n").unwrap();
        let cfg = Config::load_from_file(&path).expect("load");
        assert_eq!(cfg.network_interface, "eth0");
        assert_eq!(cfg.output_format, OutputFormat::Json);

        fs::write(&path, "interval_secs: -1\n").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(ConfigError::Validation(_))
        ));
    }
}
