use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use rowtide_config::{InputConfig, StaticFilterConfig, StreamingConfig};

/// Project configuration from rowtide.toml. Each section is optional; the
/// subcommand decides which one it needs.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    pub input: Option<InputConfig>,
    pub static_filter: Option<StaticFilterConfig>,
    pub streaming: Option<StreamingConfig>,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse after substituting `${VAR}` references from the environment.
    pub fn parse(content: &str) -> Result<Self> {
        let resolved = resolve_env(content)?;
        let config: ProjectConfig = toml::from_str(&resolved)?;
        Ok(config)
    }

    pub fn input(&self) -> Result<&InputConfig> {
        self.input
            .as_ref()
            .context("No [input] section in config file")
    }

    pub fn static_filter(&self) -> Result<&StaticFilterConfig> {
        self.static_filter
            .as_ref()
            .context("No [static_filter] section in config file")
    }

    pub fn streaming(&self) -> Result<&StreamingConfig> {
        self.streaming
            .as_ref()
            .context("No [streaming] section in config file")
    }
}

/// Resolve environment variables in a string.
/// Supports ${VAR_NAME} syntax. An unset variable is an error.
pub fn resolve_env(s: &str) -> Result<String> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + end];
        let value = std::env::var(var_name)
            .with_context(|| format!("Environment variable {} is not set", var_name))?;
        result.push_str(&rest[..start]);
        result.push_str(&value);
        rest = &rest[start + end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_resolve_env() {
        std::env::set_var("ROWTIDE_TEST_VAR", "hello");

        assert_eq!(resolve_env("${ROWTIDE_TEST_VAR}").unwrap(), "hello");
        assert_eq!(
            resolve_env("prefix_${ROWTIDE_TEST_VAR}_suffix").unwrap(),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env("no_vars").unwrap(), "no_vars");
        assert_eq!(resolve_env("unterminated ${oops").unwrap(), "unterminated ${oops");

        std::env::remove_var("ROWTIDE_TEST_MISSING");
        assert!(resolve_env("${ROWTIDE_TEST_MISSING}").is_err());

        std::env::remove_var("ROWTIDE_TEST_VAR");
    }

    #[test]
    #[serial]
    fn test_parse_sections() {
        std::env::set_var("ROWTIDE_TEST_DB", "postgres://localhost/infra");
        let config = ProjectConfig::parse(
            r#"
[streaming]
driver = "postgres"
connection_string = "${ROWTIDE_TEST_DB}"
statement = "SELECT name FROM servers WHERE ip = :ip"
parameters = { ip = "ip" }
target = "server"
"#,
        )
        .unwrap();

        assert!(config.input().is_err());
        assert!(config.static_filter().is_err());
        let streaming = config.streaming().unwrap().to_settings().unwrap();
        assert_eq!(
            streaming.connection.connection_string,
            "postgres://localhost/infra"
        );
        std::env::remove_var("ROWTIDE_TEST_DB");
    }
}
