//! Controller configuration
//!
//! Loaded from YAML or `TICKSTAMP_*` environment variables. Durations are
//! written as a number and a unit: `500us`, `10ms`, `2s`, `1m`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::encoder::Alphabet;
use crate::error::{Error, Result};

/// Automatic promotion policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prefer {
    /// Worker thread when available, cooperative task otherwise
    #[default]
    Auto,
    /// Never promote
    Basic,
    /// Always the cooperative task
    Internal,
    /// Always a worker thread
    Worker,
}

impl Prefer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prefer::Auto => "auto",
            Prefer::Basic => "basic",
            Prefer::Internal => "internal",
            Prefer::Worker => "worker",
        }
    }

    pub fn auto_promotes(&self) -> bool {
        !matches!(self, Prefer::Basic)
    }
}

impl FromStr for Prefer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "auto" => Ok(Prefer::Auto),
            "basic" => Ok(Prefer::Basic),
            "internal" => Ok(Prefer::Internal),
            "worker" => Ok(Prefer::Worker),
            other => Err(Error::Config(format!("unknown prefer mode: {}", other))),
        }
    }
}

impl fmt::Display for Prefer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Label for logs, metrics and the worker thread name
    #[serde(default = "default_name")]
    pub name: String,
    /// Calls per window that trigger promotion
    #[serde(default = "default_threshold_calls")]
    pub threshold_calls: u64,
    #[serde(default = "default_threshold_window", deserialize_with = "de_duration")]
    pub threshold_window: Duration,
    /// Quiet period after which a promoted refresher stops itself
    #[serde(default = "default_idle_cooldown", deserialize_with = "de_duration")]
    pub idle_cooldown: Duration,
    #[serde(default)]
    pub prefer: Prefer,
    /// Custom 64-symbol alphabet; the default one when unset
    #[serde(default)]
    pub alphabet: Option<String>,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_threshold_calls() -> u64 {
    1000
}

fn default_threshold_window() -> Duration {
    Duration::from_millis(10)
}

fn default_idle_cooldown() -> Duration {
    Duration::from_secs(1)
}

fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            threshold_calls: default_threshold_calls(),
            threshold_window: default_threshold_window(),
            idle_cooldown: default_idle_cooldown(),
            prefer: Prefer::default(),
            alphabet: None,
        }
    }
}

impl Config {
    /// Load and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `TICKSTAMP_*` environment variables, defaulting unset ones
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(name) = std::env::var("TICKSTAMP_NAME") {
            config.name = name;
        }
        if let Ok(calls) = std::env::var("TICKSTAMP_THRESHOLD_CALLS") {
            config.threshold_calls = calls.trim().parse().map_err(|_| {
                Error::Config(format!("TICKSTAMP_THRESHOLD_CALLS is not an integer: {}", calls))
            })?;
        }
        if let Ok(window) = std::env::var("TICKSTAMP_THRESHOLD_WINDOW") {
            config.threshold_window = parse_duration(&window)?;
        }
        if let Ok(cooldown) = std::env::var("TICKSTAMP_IDLE_COOLDOWN") {
            config.idle_cooldown = parse_duration(&cooldown)?;
        }
        if let Ok(prefer) = std::env::var("TICKSTAMP_PREFER") {
            config.prefer = prefer.parse()?;
        }
        if let Ok(alphabet) = std::env::var("TICKSTAMP_ALPHABET") {
            config.alphabet = Some(alphabet);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("name must not be empty".to_string()));
        }
        if self.threshold_calls == 0 {
            return Err(Error::Config(
                "threshold_calls must be at least 1".to_string(),
            ));
        }
        if self.threshold_window.is_zero() {
            return Err(Error::Config(
                "threshold_window must be greater than zero".to_string(),
            ));
        }
        if self.idle_cooldown.is_zero() {
            return Err(Error::Config(
                "idle_cooldown must be greater than zero".to_string(),
            ));
        }
        self.alphabet()?;
        Ok(())
    }

    /// The configured alphabet, validated
    pub fn alphabet(&self) -> Result<Alphabet> {
        match &self.alphabet {
            Some(symbols) => Alphabet::new(symbols),
            None => Ok(Alphabet::DEFAULT),
        }
    }
}

/// Parse a duration string like "250us", "10ms", "2s" or "1m"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("empty duration".to_string()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::Config(format!("duration has no unit: {}", s)))?;
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration: {}", s)))?;

    match unit {
        "us" => Ok(Duration::from_micros(num)),
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "m" => Ok(Duration::from_secs(num * 60)),
        _ => Err(Error::Config(format!("unknown duration unit: {}", unit))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let yaml = r#"
name: ids
threshold_calls: 500
threshold_window: 2ms
idle_cooldown: 250ms
prefer: worker
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.name, "ids");
        assert_eq!(config.threshold_calls, 500);
        assert_eq!(config.threshold_window, Duration::from_millis(2));
        assert_eq!(config.idle_cooldown, Duration::from_millis(250));
        assert_eq!(config.prefer, Prefer::Worker);
        assert!(config.alphabet.is_none());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.name, "default");
        assert_eq!(config.threshold_calls, 1000);
        assert_eq!(config.threshold_window, Duration::from_millis(10));
        assert_eq!(config.idle_cooldown, Duration::from_secs(1));
        assert_eq!(config.prefer, Prefer::Auto);
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let result = Config::from_yaml("threshold_calls: 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_durations() {
        assert!(matches!(
            Config::from_yaml("threshold_window: 0us"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_yaml("idle_cooldown: 0s"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_bad_alphabet() {
        let result = Config::from_yaml("alphabet: abc");
        assert!(matches!(result, Err(Error::Alphabet(_))));
    }

    #[test]
    fn test_rejects_unknown_fields_and_modes() {
        assert!(matches!(
            Config::from_yaml("threshold: 5"),
            Err(Error::Yaml(_))
        ));
        assert!(matches!(
            Config::from_yaml("prefer: turbo"),
            Err(Error::Yaml(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/tickstamp.yaml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("10ms").unwrap(), Duration::from_millis(10));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration(" 1m ").unwrap(), Duration::from_secs(60));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5h").is_err());
    }

    #[test]
    fn test_prefer_from_str() {
        assert_eq!("auto".parse::<Prefer>().unwrap(), Prefer::Auto);
        assert_eq!("basic".parse::<Prefer>().unwrap(), Prefer::Basic);
        assert_eq!("internal".parse::<Prefer>().unwrap(), Prefer::Internal);
        assert_eq!("worker".parse::<Prefer>().unwrap(), Prefer::Worker);
        assert!("fast".parse::<Prefer>().is_err());
        assert!(!Prefer::Basic.auto_promotes());
        assert!(Prefer::Auto.auto_promotes());
    }

    // Env var tests share process state; keep them in one function
    #[test]
    fn test_config_from_env() {
        std::env::set_var("TICKSTAMP_NAME", "env-ids");
        std::env::set_var("TICKSTAMP_THRESHOLD_CALLS", "64");
        std::env::set_var("TICKSTAMP_THRESHOLD_WINDOW", "500us");
        std::env::set_var("TICKSTAMP_PREFER", "internal");

        let config = Config::from_env().unwrap();
        assert_eq!(config.name, "env-ids");
        assert_eq!(config.threshold_calls, 64);
        assert_eq!(config.threshold_window, Duration::from_micros(500));
        assert_eq!(config.idle_cooldown, Duration::from_secs(1)); // default
        assert_eq!(config.prefer, Prefer::Internal);

        std::env::set_var("TICKSTAMP_THRESHOLD_CALLS", "many");
        assert!(matches!(Config::from_env(), Err(Error::Config(_))));

        std::env::remove_var("TICKSTAMP_NAME");
        std::env::remove_var("TICKSTAMP_THRESHOLD_CALLS");
        std::env::remove_var("TICKSTAMP_THRESHOLD_WINDOW");
        std::env::remove_var("TICKSTAMP_PREFER");
    }
}
