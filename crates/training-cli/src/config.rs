use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH: &str = "~/.tjob/config.toml";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Defaults read from `~/.tjob/config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub namespace: Option<String>,
    /// Container whose logs are shown when `-c` is not given.
    pub container: Option<String>,
    /// `wait`/`get --watch` timeout, humantime syntax (e.g. "10m").
    pub timeout: Option<String>,
    /// `wait` polling interval, humantime syntax.
    pub interval: Option<String>,
}

impl Config {
    pub fn timeout(&self) -> Result<Duration, humantime::DurationError> {
        parse_or(self.timeout.as_deref(), DEFAULT_TIMEOUT)
    }

    pub fn interval(&self) -> Result<Duration, humantime::DurationError> {
        parse_or(self.interval.as_deref(), DEFAULT_INTERVAL)
    }
}

fn parse_or(value: Option<&str>, default: Duration) -> Result<Duration, humantime::DurationError> {
    value.map_or(Ok(default), humantime::parse_duration)
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load the config, treating a missing file as empty.
pub fn load_from(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| format!("invalid config {}: {}", path.display(), e))?;
    Ok(config)
}

pub fn parse_config() -> Result<Config, Box<dyn std::error::Error>> {
    load_from(&expand_tilde(CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(600));
        assert_eq!(config.interval().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn reads_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "namespace = \"ml\"\ncontainer = \"pytorch\"\ntimeout = \"1h\"\ninterval = \"5s\"\n",
        )
        .unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.namespace.as_deref(), Some("ml"));
        assert_eq!(config.container.as_deref(), Some("pytorch"));
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.interval().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "namespcae = \"ml\"\n").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_tilde("~/.tjob/config.toml");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".tjob/config.toml"));
        }
        assert_eq!(expand_tilde("/etc/tjob.toml"), PathBuf::from("/etc/tjob.toml"));
    }
}
