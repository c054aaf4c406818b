//! Router configuration, resolved once before the router is sealed.
//!
//! [`Settings`] deserializes from JSON with every field optional, so a config
//! file only names what it changes:
//!
//! ```
//! use rtrouter::config::Settings;
//!
//! let settings = Settings::from_json(r#"{ "case_insensitive": true, "cache_size": 64 }"#).unwrap();
//! assert!(settings.case_insensitive);
//! assert_eq!(settings.cache_size, 64);
//! assert_eq!(settings.max_route_params, Settings::default().max_route_params);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default lookup cache capacity, in entries.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Default ceiling on parameters (including the wildcard) in one route pattern.
pub const DEFAULT_MAX_ROUTE_PARAMS: usize = 1024;

/// Default ceiling on the request path length.
pub const DEFAULT_MAX_REQUEST_URL_LENGTH: usize = 2048;

/// Default ceiling on a buffered request (headers plus body), 4 MiB.
pub const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced while loading [`Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Router behavior switches and limits.
///
/// Owned by the sealed [`Router`](crate::router::Router) and never mutated
/// while requests are being served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Match static path text without regard to ASCII case. Captured
    /// parameter values keep the casing of the request.
    ///
    /// Only `A-Z` fold: `/Über` matches `/ÜBER` but not `/über`.
    pub case_insensitive: bool,

    /// Maximum number of entries held by the lookup cache.
    pub cache_size: usize,

    /// Skip the lookup cache and walk the tree on every request.
    pub disable_caching: bool,

    /// Answer `405 Method Not Allowed` with an `Allow` header when the path is
    /// registered under a different method.
    pub handle_method_not_allowed: bool,

    /// Answer `OPTIONS` requests automatically when no `OPTIONS` route matches.
    pub handle_options: bool,

    /// Turn a panicking handler into a `500 Internal Server Error`.
    pub auto_recover: bool,

    /// Maximum parameters (the wildcard counts as one) in a single route pattern.
    pub max_route_params: usize,

    /// Longer request paths are rejected with `414 URI Too Long`.
    pub max_request_url_length: usize,

    /// Largest request the server adapter buffers before answering `413`.
    pub max_request_body_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            cache_size: DEFAULT_CACHE_SIZE,
            disable_caching: false,
            handle_method_not_allowed: false,
            handle_options: false,
            auto_recover: false,
            max_route_params: DEFAULT_MAX_ROUTE_PARAMS,
            max_request_url_length: DEFAULT_MAX_REQUEST_URL_LENGTH,
            max_request_body_size: DEFAULT_MAX_REQUEST_BODY_SIZE,
        }
    }
}

impl Settings {
    /// Parses settings from a JSON document and validates them.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Json`]: the document is not valid JSON or has a field
    ///   of the wrong type.
    /// - [`ConfigError::Invalid`]: a limit is set to zero.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_route_params", self.max_route_params),
            ("max_request_url_length", self.max_request_url_length),
            ("max_request_body_size", self.max_request_body_size),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        Ok(())
    }

    /// Returns `true` when lookups should go through the cache.
    pub fn caching_enabled(&self) -> bool {
        !self.disable_caching && self.cache_size > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert!(!s.case_insensitive);
        assert!(!s.handle_options);
        assert_eq!(s.cache_size, 1000);
        assert_eq!(s.max_route_params, 1024);
        assert_eq!(s.max_request_url_length, 2048);
        assert!(s.caching_enabled());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(Settings::from_json("{}").unwrap(), Settings::default());
    }

    #[test]
    fn partial_document_overrides_named_fields() {
        let s = Settings::from_json(
            r#"{ "auto_recover": true, "handle_method_not_allowed": true, "disable_caching": true }"#,
        )
        .unwrap();
        assert!(s.auto_recover);
        assert!(s.handle_method_not_allowed);
        assert!(!s.caching_enabled());
        assert_eq!(s.cache_size, DEFAULT_CACHE_SIZE);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = Settings::from_json(r#"{ "max_route_params": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_route_params",
                ..
            }
        ));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Settings::from_json(r#"{ "cache_size": "lots" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn zero_cache_size_disables_caching() {
        let s = Settings {
            cache_size: 0,
            ..Settings::default()
        };
        assert!(!s.caching_enabled());
    }
}
