//! Configuration validation with aggregated errors.
//! Every issue found is collected into `Vec<String>` instead of stopping
//! at the first one.

use tracing::{error, info};

use crate::config::settings::{RetryConfig, SettingsConfig};
use crate::config::types::{BackendConfig, GenericSourceValue, ServiceConfig, SessionConfig};
use crate::observability::metrics::get_metrics;
use crate::utils::constants::CACHE_KEY_SEPARATOR;

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);
    validate_backend(&cfg.backend, &mut errors);
    validate_session(&cfg.session, &mut errors);

    if errors.is_empty() {
        info!("config is valid");
        Ok(())
    } else {
        for e in &errors {
            error!("config error: {}", e);
        }
        get_metrics()
            .config_validation_errors
            .inc_by(errors.len() as u64);
        Err(errors)
    }
}

fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    if let Some(retry) = &settings.retry {
        validate_retry(retry, errors);
    }

    if settings.metrics.is_enabled && !settings.metrics.path.starts_with('/') {
        errors.push(format!(
            "settings.metrics.path '{}' must start with '/'",
            settings.metrics.path
        ));
    }

    if settings.server.port.parse::<u16>().is_err() {
        errors.push(format!(
            "settings.server.port '{}' is not a valid port",
            settings.server.port
        ));
    }

    if let Some(logging) = &settings.logging {
        let level = logging.level.to_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
            errors.push(format!("settings.logging.level '{}' is not supported", logging.level));
        }
    }
}

fn validate_retry(retry: &RetryConfig, errors: &mut Vec<String>) {
    if let Some(factor) = retry.factor {
        if !factor.is_finite() || factor < 1.0 {
            errors.push(format!("settings.retry.factor must be >= 1.0, got {}", factor));
        }
    }

    if let (Some(initial), Some(max)) = (retry.initial_delay_ms, retry.max_delay_ms) {
        if initial > max {
            errors.push(format!(
                "settings.retry.initial_delay_ms ({}) must be <= max_delay_ms ({})",
                initial, max
            ));
        }
    }
}

fn validate_backend(backend: &BackendConfig, errors: &mut Vec<String>) {
    if !(backend.base_url.starts_with("http://") || backend.base_url.starts_with("https://")) {
        errors.push(format!(
            "backend.base_url '{}' must be an http(s) url",
            backend.base_url
        ));
    }

    if backend.timeout_ms == 0 {
        errors.push("backend.timeout_ms must be > 0".to_string());
    }

    if let Some(headers) = &backend.headers {
        for (name, value) in headers {
            if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(format!("backend.headers['{}'] is not a valid header name", name));
            }
            if let GenericSourceValue::FromEnv { from_env } = value {
                if from_env.is_empty() {
                    errors.push(format!("backend.headers['{}'].from_env is empty", name));
                }
            }
        }
    }
}

fn validate_session(session: &SessionConfig, errors: &mut Vec<String>) {
    if session.session_id.trim().is_empty() {
        errors.push("session.session_id must not be empty".to_string());
    }

    for template in &session.templates {
        if template.is_empty() || template.contains(CACHE_KEY_SEPARATOR) {
            errors.push(format!(
                "session.templates entry '{}' must be non-empty and must not contain '{}'",
                template, CACHE_KEY_SEPARATOR
            ));
        }
    }

    if let Some(org) = &session.organization_id {
        if org.contains(CACHE_KEY_SEPARATOR) {
            errors.push(format!(
                "session.organization_id '{}' must not contain '{}'",
                org, CACHE_KEY_SEPARATOR
            ));
        }
    }
}
