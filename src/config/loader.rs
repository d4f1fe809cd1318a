//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use crate::health::ReplyPolicy;
    use std::time::Duration;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config("address = \"0.0.0.0\"\nport = 5353\n").unwrap();
        assert_eq!(config.bind_address().unwrap().to_string(), "0.0.0.0:5353");
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.listeners.udp_size, 65_535);
        assert_eq!(config.health.reply_policy, ReplyPolicy::Strict);
    }

    #[test]
    fn full_config_round_trips_into_runtime_settings() {
        let config = parse_config(
            r#"
            address = "::1"
            port = 9999
            timeout_ms = 2000

            [health]
            poll_interval_ms = 20
            attempt_timeout_ms = 100
            reply_policy = "any_reply"
            stream_exchange = false
            query_name = "probe.example."

            [listeners]
            udp_size = 1232
            max_connections = 16
            tcp_idle_timeout_ms = 500

            [shutdown]
            drain_grace_ms = 750

            [observability]
            log_level = "debug"
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address().unwrap().to_string(), "[::1]:9999");

        let supervisor = config.supervisor_config();
        assert_eq!(supervisor.readiness_timeout, Duration::from_secs(2));
        assert_eq!(supervisor.poll_interval, Duration::from_millis(20));
        assert_eq!(supervisor.drain_grace, Duration::from_millis(750));

        let probe = config.probe_settings();
        assert_eq!(probe.attempt_timeout, Duration::from_millis(100));
        assert_eq!(probe.reply_policy, ReplyPolicy::AnyReply);
        assert!(!probe.stream_exchange);
        assert_eq!(probe.query_name, "probe.example.");

        let options = config.listener_options();
        assert_eq!(options.max_datagram_size, 1232);
        assert_eq!(options.max_connections, 16);
        assert_eq!(options.idle_timeout, Duration::from_millis(500));

        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        assert!(matches!(parse_config("port = \"fifty\""), Err(ConfigError::Parse(_))));
        assert!(matches!(
            parse_config("[health]\nreply_policy = \"maybe\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn semantic_errors_are_validation_errors() {
        let err = parse_config("port = 0").unwrap_err();
        assert!(matches!(&err, ConfigError::Validation(errors) if errors == &[ValidationError::ZeroPort]));
        assert_eq!(err.to_string(), "Validation failed: port must be non-zero");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
