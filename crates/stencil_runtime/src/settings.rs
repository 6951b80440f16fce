//! Settings management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use stencil_host::HostConfig;

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub demo: DemoSettings,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
}

/// The template the binary renders when none is given on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    pub name: String,
    pub template: String,
    pub data: serde_json::Value,
    pub options: Vec<String>,
    pub helpers: bool,
    pub hermetic: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            demo: DemoSettings::default(),
            host: HostConfig::default(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            name: "demo".to_string(),
            template: "Hello, {{ .name }}! {{ upper .greeting }}\n".to_string(),
            data: serde_json::json!({
                "name": "stencil",
                "greeting": "welcome",
            }),
            options: Vec::new(),
            helpers: true,
            hermetic: true,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .parse()
            .with_context(|| format!("unknown log level {:?}", self.logging.level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fill_in_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "logging": { "level": "debug" }, "host": { "gc_on_teardown": false } }"#)
                .unwrap();
        assert_eq!(settings.level().unwrap(), tracing::Level::DEBUG);
        assert_eq!(settings.demo.name, "demo");
        assert!(!settings.host.gc_on_teardown);
        assert_eq!(settings.host.memory_limit, 0);
        assert!(!settings.host.expose_gc);
    }

    #[test]
    fn bad_level_is_reported() {
        let mut settings = Settings::default();
        settings.logging.level = "loud".into();
        assert!(settings.level().is_err());
    }
}
