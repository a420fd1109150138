use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Master switch; when false the health worker never starts.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Floor on the evaluation loop period, seconds.
    #[serde(default = "default_run_at_least_every_secs")]
    pub run_at_least_every_secs: i64,
    /// How long to postpone alarm checks after a detected suspension.
    #[serde(default = "default_postpone_hibernation_secs")]
    pub postpone_hibernation_secs: i64,
    /// User alarm rules directory, handed to the rule provider.
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    /// Bundled alarm rules directory.
    #[serde(default = "default_stock_config_dir")]
    pub stock_config_dir: String,
    /// Silencer ruleset persisted by the control API.
    #[serde(default = "default_silencers_file")]
    pub silencers_file: String,
    /// Per-host alarm event log bound.
    #[serde(default = "default_log_max_entries")]
    pub log_max_entries: usize,
    #[serde(default = "default_exec")]
    pub default_exec: String,
    #[serde(default = "default_recipient")]
    pub default_recipient: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            run_at_least_every_secs: default_run_at_least_every_secs(),
            postpone_hibernation_secs: default_postpone_hibernation_secs(),
            config_dir: default_config_dir(),
            stock_config_dir: default_stock_config_dir(),
            silencers_file: default_silencers_file(),
            log_max_entries: default_log_max_entries(),
            default_exec: default_exec(),
            default_recipient: default_recipient(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_run_at_least_every_secs() -> i64 {
    10
}

fn default_postpone_hibernation_secs() -> i64 {
    60
}

fn default_config_dir() -> String {
    "health.d".to_string()
}

fn default_stock_config_dir() -> String {
    "stock/health.d".to_string()
}

fn default_silencers_file() -> String {
    "health.silencers.json".to_string()
}

fn default_log_max_entries() -> usize {
    1000
}

fn default_exec() -> String {
    "alarm-notify.sh".to_string()
}

fn default_recipient() -> String {
    "root".to_string()
}

impl DaemonConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert!(config.health.enabled);
        assert_eq!(config.health.run_at_least_every_secs, 10);
        assert_eq!(config.health.postpone_hibernation_secs, 60);
        assert_eq!(config.health.log_max_entries, 1000);
        assert_eq!(config.health.default_recipient, "root");
    }

    #[test]
    fn health_table_overrides() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [health]
            enabled = false
            run_at_least_every_secs = 2
            silencers_file = "/tmp/silencers.json"
            "#,
        )
        .unwrap();
        assert!(!config.health.enabled);
        assert_eq!(config.health.run_at_least_every_secs, 2);
        assert_eq!(config.health.silencers_file, "/tmp/silencers.json");
        // untouched keys keep their defaults
        assert_eq!(config.health.default_exec, "alarm-notify.sh");
    }
}
