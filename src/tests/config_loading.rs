#[cfg(test)]
mod test {

    use std::io::Write;

    use crate::config::loader::{file_to_config, parse_config};
    use crate::config::settings::LogFormat;
    use crate::config::types::GenericSourceValue;
    use crate::resilience::retry::RetryPolicy;
    use crate::utils::constants::{
        DEFAULT_HTTP_TIMEOUT_MS, DEFAULT_REFRESH_BUFFER_SECONDS, DEFAULT_RETRY_FACTOR,
        DEFAULT_RETRY_MAX_RETRIES,
    };

    const MINIMAL: &str = r#"
backend:
  base_url: "https://clerk.example.com"
session:
  session_id: "sess_2abc"
"#;

    const FULL: &str = r#"
settings:
  refresh_buffer_seconds: 15
  retry:
    factor: 2.0
    initial_delay_ms: 250
    max_delay_ms: 4000
    max_retries: 3
  metrics:
    path: "/internal/metrics"
    is_enabled: true
  server:
    host: "0.0.0.0"
    port: "9100"
  logging:
    level: "debug"
    format: "compact"
backend:
  base_url: "https://clerk.example.com"
  timeout_ms: 2500
  headers:
    Authorization:
      value: "Bearer secret"
    X-Client-Id:
      from_env: "CLIENT_ID"
session:
  session_id: "sess_2abc"
  organization_id: "org_9"
  templates: ["supabase", "hasura"]
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL.to_owned()).unwrap();

        assert_eq!(config.settings.refresh_buffer_seconds(), DEFAULT_REFRESH_BUFFER_SECONDS);
        assert!(config.settings.retry.is_none());
        assert!(!config.settings.metrics.is_enabled);
        assert_eq!(config.settings.metrics.path, "/metrics");
        assert_eq!(config.settings.server.port, "8080");
        assert_eq!(config.settings.logging.as_ref().unwrap().level, "info");
        assert_eq!(config.backend.timeout_ms, DEFAULT_HTTP_TIMEOUT_MS);
        assert!(config.session.templates.is_empty());
        assert!(config.session.organization_id.is_none());
    }

    #[test]
    fn full_config_is_parsed() {
        let config = parse_config(FULL.to_owned()).unwrap();

        assert_eq!(config.settings.refresh_buffer_seconds(), 15);
        assert_eq!(config.settings.metrics.path, "/internal/metrics");
        assert_eq!(config.settings.server.host, "0.0.0.0");
        let logging = config.settings.logging.as_ref().unwrap();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, LogFormat::Compact);

        let headers = config.backend.headers.as_ref().unwrap();
        assert!(matches!(
            headers.get("Authorization"),
            Some(GenericSourceValue::Literal { value }) if value == "Bearer secret"
        ));
        assert!(matches!(
            headers.get("X-Client-Id"),
            Some(GenericSourceValue::FromEnv { from_env }) if from_env == "CLIENT_ID"
        ));
        assert_eq!(config.session.templates, vec!["supabase", "hasura"]);

        let policy = RetryPolicy::from(config.settings.retry.as_ref().unwrap());
        assert_eq!(policy.factor, 2.0);
        assert_eq!(policy.initial_delay_ms, 250);
        assert_eq!(policy.max_delay_ms, 4000);
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn partial_retry_block_falls_back_per_field() {
        let yaml = format!("settings:\n  retry:\n    initial_delay_ms: 100\n{}", MINIMAL);
        let config = parse_config(yaml).unwrap();

        let policy = RetryPolicy::from(config.settings.retry.as_ref().unwrap());
        assert_eq!(policy.initial_delay_ms, 100);
        assert_eq!(policy.factor, DEFAULT_RETRY_FACTOR);
        assert_eq!(policy.max_retries, DEFAULT_RETRY_MAX_RETRIES);
    }

    #[test]
    fn every_validation_error_is_reported() {
        let yaml = r#"
settings:
  retry:
    factor: 0.5
    initial_delay_ms: 5000
    max_delay_ms: 100
  server:
    port: "not-a-port"
backend:
  base_url: "ftp://clerk.example.com"
  timeout_ms: 0
session:
  session_id: ""
  templates: ["bad:template"]
"#;
        let error = parse_config(yaml.to_owned()).unwrap_err().to_string();

        assert!(error.starts_with("config is not valid"));
        for expected in [
            "settings.retry.factor",
            "initial_delay_ms (5000) must be <= max_delay_ms (100)",
            "settings.server.port",
            "backend.base_url",
            "backend.timeout_ms",
            "session.session_id",
            "'bad:template'",
        ] {
            assert!(error.contains(expected), "missing '{}' in: {}", expected, error);
        }
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        assert!(parse_config("backend: [".to_owned()).is_err());
        // session block missing
        assert!(parse_config("backend:\n  base_url: \"https://x\"\n".to_owned()).is_err());
    }

    #[tokio::test]
    async fn loads_config_file_with_env_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "backend:\n  base_url: \"${{SESSION_TOKEN_CACHE_TEST_UNSET_URL:https://clerk.example.com}}\"\nsession:\n  session_id: \"sess_2abc\"\n"
        )
        .unwrap();

        let config = file_to_config(file.path()).await.unwrap();
        assert_eq!(config.backend.base_url, "https://clerk.example.com");
        assert_eq!(config.session.session_id, "sess_2abc");
    }

    #[tokio::test]
    async fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(file_to_config(&dir.path().join("absent.yaml")).await.is_err());
    }
}
