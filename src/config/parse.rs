use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Keeps archive file names within filesystem limits.
const MAX_EXTENSION_LEN: usize = 16;

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(inner) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), inner),
        )),
        other => other,
    })
}

/// Parse and validate a config from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Environment variables are expanded before parsing so secrets can stay out of the file
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded_vars = unexpanded_env_vars(yaml_string);

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    config.archive.path = expand_tilde(&config.archive.path);
    config.store.path = expand_tilde(&config.store.path);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_source(&config.source, &mut errors);
    validate_watch(&config.watch, &mut errors);

    let extension = &config.archive.extension;
    if extension.is_empty()
        || extension.len() > MAX_EXTENSION_LEN
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        errors.push(format!(
            "archive.extension must be 1 to {MAX_EXTENSION_LEN} alphanumeric characters, got '{}'",
            extension
        ));
    }

    if config.store.path.as_os_str().is_empty() {
        errors.push("store.path must not be empty".to_string());
    }
    if config.archive.path.as_os_str().is_empty() {
        errors.push("archive.path must not be empty".to_string());
    }
    if config.store.path.parent() == Some(config.archive.path.as_path()) {
        // The state file must not share a directory with archived documents
        errors.push("store.path must not live inside archive.path".to_string());
    }

    if config.web.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen '{}' is not a valid socket address",
            config.web.listen
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_source(source: &SourceConfig, errors: &mut Vec<String>) {
    if !(source.base_url.starts_with("http://") || source.base_url.starts_with("https://")) {
        errors.push(format!(
            "source.base_url must be an http(s) URL, got '{}'",
            source.base_url
        ));
    }

    if source.oauth_realm.trim().is_empty() {
        errors.push("source.oauth_realm must not be empty".to_string());
    }

    let has_id = source.client_id.as_deref().is_some_and(|s| !s.is_empty());
    let has_secret = source.client_secret.as_deref().is_some_and(|s| !s.is_empty());
    let has_basic = source
        .basic_credentials
        .as_deref()
        .is_some_and(|s| !s.is_empty());

    if has_id != has_secret {
        errors.push("source.client_id and source.client_secret must be set together".to_string());
    } else if !has_id && !has_basic {
        errors.push(
            "missing credentials: set source.client_id and source.client_secret, or source.basic_credentials"
                .to_string(),
        );
    }

    if source.page_size == 0 {
        errors.push("source.page_size must be greater than zero".to_string());
    }
}

fn validate_watch(watch: &WatchConfig, errors: &mut Vec<String>) {
    if watch.min_poll.is_zero() {
        errors.push("watch.min_poll must be greater than zero".to_string());
    }
    if watch.default_wait > watch.max_wait {
        errors.push(format!(
            "watch.default_wait ({}) exceeds watch.max_wait ({})",
            duration_format::format_duration(watch.default_wait),
            duration_format::format_duration(watch.max_wait)
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINIMAL: &str = r#"
source:
  base_url: https://api.example.test
  oauth_realm: demo
  client_id: id
  client_secret: secret
archive:
  path: /var/lib/docwatch/downloads
store:
  path: /var/lib/docwatch/state.json
web:
  listen: "127.0.0.1:8000"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.watch.default_wait, Duration::from_secs(120));
        assert_eq!(config.watch.default_poll, Duration::from_secs(5));
        assert_eq!(config.watch.min_poll, Duration::from_millis(500));
        assert_eq!(config.archive.extension, "pdf");
        assert_eq!(config.source.page_size, 20);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let yaml = MINIMAL
            .replace("  client_id: id\n", "")
            .replace("  client_secret: secret\n", "");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("missing credentials"));
    }

    #[test]
    fn test_half_credentials_rejected() {
        let yaml = MINIMAL.replace("  client_secret: secret\n", "");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn test_basic_credentials_accepted() {
        let yaml = MINIMAL
            .replace("  client_id: id\n", "")
            .replace("  client_secret: secret\n", "  basic_credentials: aWQ6c2VjcmV0\n");
        assert!(parse_config(&yaml).is_ok());
    }

    #[test]
    fn test_errors_are_collected() {
        let yaml = MINIMAL
            .replace("https://api.example.test", "ftp://nope")
            .replace("127.0.0.1:8000", "not-an-address");
        match parse_config(&yaml).unwrap_err() {
            ConfigError::ValidationList(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_wait_above_ceiling_rejected() {
        let yaml = format!("{MINIMAL}watch:\n  default_wait: 2h\n  max_wait: 1h\n");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("exceeds watch.max_wait"));
    }

    #[test]
    fn test_unset_env_var_reported() {
        let yaml = MINIMAL.replace("secret\n", "$env{DOCWATCH_PARSE_TEST_UNSET}\n");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("DOCWATCH_PARSE_TEST_UNSET"));
    }

    #[test]
    fn test_extension_length_bounded() {
        let with_extension = |ext: &str| {
            MINIMAL.replace(
                "  path: /var/lib/docwatch/downloads\n",
                &format!("  path: /var/lib/docwatch/downloads\n  extension: {ext}\n"),
            )
        };
        assert!(parse_config(&with_extension("tar7z")).is_ok());
        let err = parse_config(&with_extension(&"x".repeat(17))).unwrap_err();
        assert!(err.to_string().contains("archive.extension"));
    }
}
