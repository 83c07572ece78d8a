//! Client configuration and credential resolution
//!
//! A [`ClientConfig`] is built once from [`ClientOptions`] and never changes
//! afterwards. Resolution fails with [`Error::Configuration`] before any
//! request is attempted, so a missing key never shows up as a remote 401.

use crate::error::{Error, Result};
use crate::transport::Service;
use reqwest::Url;
use std::env;
use std::fmt;

/// Environment variable consulted when no explicit API key is given
pub const API_KEY_ENV: &str = "VOXELIZE_API_KEY";

/// Environment variable for the packing service base URL
pub const PACKING_URL_ENV: &str = "VOXELIZE_PACKING_API_URL";

/// Environment variable for the meshing service base URL
pub const MESHING_URL_ENV: &str = "VOXELIZE_MESHING_API_URL";

/// Resolve the API key from an explicit value or `VOXELIZE_API_KEY`
pub fn resolve_api_key(explicit: Option<&str>) -> Result<String> {
    resolve_api_key_with(explicit, |name| env::var(name).ok())
}

/// Resolve the API key using a custom environment lookup
///
/// An explicit non-empty key wins; blank values count as absent.
pub fn resolve_api_key_with<F>(explicit: Option<&str>, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    lookup(API_KEY_ENV)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "API key must be provided explicitly or through the {} environment variable",
                API_KEY_ENV
            ))
        })
}

/// Options recognized when constructing a client
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// API key; falls back to `VOXELIZE_API_KEY`
    pub api_key: Option<String>,
    /// Packing service base URL; falls back to `VOXELIZE_PACKING_API_URL`
    pub packing_api_url: Option<String>,
    /// Meshing service base URL; falls back to `VOXELIZE_MESHING_API_URL`
    pub meshing_api_url: Option<String>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_packing_api_url(mut self, url: impl Into<String>) -> Self {
        self.packing_api_url = Some(url.into());
        self
    }

    pub fn with_meshing_api_url(mut self, url: impl Into<String>) -> Self {
        self.meshing_api_url = Some(url.into());
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("packing_api_url", &self.packing_api_url)
            .field("meshing_api_url", &self.meshing_api_url)
            .finish()
    }
}

/// Validated, immutable client configuration
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    api_key: String,
    packing_base_url: String,
    meshing_base_url: String,
}

impl ClientConfig {
    /// Resolve options against the process environment
    pub fn resolve(options: ClientOptions) -> Result<Self> {
        Self::resolve_with(options, |name| env::var(name).ok())
    }

    /// Resolve options against a custom environment lookup
    pub fn resolve_with<F>(options: ClientOptions, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = resolve_api_key_with(options.api_key.as_deref(), &lookup)?;
        let packing_base_url = resolve_url(
            options.packing_api_url,
            PACKING_URL_ENV,
            Service::Packing,
            &lookup,
        )?;
        let meshing_base_url = resolve_url(
            options.meshing_api_url,
            MESHING_URL_ENV,
            Service::Meshing,
            &lookup,
        )?;

        Ok(Self {
            api_key,
            packing_base_url,
            meshing_base_url,
        })
    }

    /// Shorthand for fully explicit configuration (no environment lookup)
    pub fn new(
        api_key: impl Into<String>,
        packing_api_url: impl Into<String>,
        meshing_api_url: impl Into<String>,
    ) -> Result<Self> {
        let options = ClientOptions::new()
            .with_api_key(api_key)
            .with_packing_api_url(packing_api_url)
            .with_meshing_api_url(meshing_api_url);
        Self::resolve_with(options, |_| None)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn packing_base_url(&self) -> &str {
        &self.packing_base_url
    }

    pub fn meshing_base_url(&self) -> &str {
        &self.meshing_base_url
    }

    /// Base URL of the given service, without trailing slash
    pub fn base_url(&self, service: Service) -> &str {
        match service {
            Service::Packing => &self.packing_base_url,
            Service::Meshing => &self.meshing_base_url,
        }
    }

    /// Full URL of an endpoint on a service
    pub fn endpoint_url(&self, service: Service, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url(service),
            endpoint.trim_start_matches('/')
        )
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("packing_base_url", &self.packing_base_url)
            .field("meshing_base_url", &self.meshing_base_url)
            .finish()
    }
}

fn resolve_url<F>(
    explicit: Option<String>,
    env_name: &str,
    service: Service,
    lookup: &F,
) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = explicit
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .or_else(|| {
            lookup(env_name)
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
        })
        .ok_or_else(|| {
            Error::Configuration(format!(
                "{} API URL must be provided explicitly or through {}",
                service, env_name
            ))
        })?;

    let url = Url::parse(&raw).map_err(|e| {
        Error::Configuration(format!("Invalid {} API URL '{}': {}", service, raw, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Configuration(format!(
            "{} API URL '{}' must use http or https",
            service, raw
        )));
    }

    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_explicit_key_wins() {
        let lookup = env_of(&[(API_KEY_ENV, "from-env")]);
        let key = resolve_api_key_with(Some("explicit"), lookup).unwrap();
        assert_eq!(key, "explicit");
    }

    #[test]
    fn test_key_from_env() {
        let lookup = env_of(&[(API_KEY_ENV, "from-env")]);
        assert_eq!(resolve_api_key_with(None, &lookup).unwrap(), "from-env");
        // Blank explicit values fall through to the environment
        assert_eq!(resolve_api_key_with(Some("  "), &lookup).unwrap(), "from-env");
    }

    #[test]
    fn test_missing_key() {
        let err = resolve_api_key_with(Some(""), |_| None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn test_resolve_with_env_urls() {
        let lookup = env_of(&[
            (API_KEY_ENV, "key"),
            (PACKING_URL_ENV, "https://packing.example.com/"),
            (MESHING_URL_ENV, "https://meshing.example.com"),
        ]);
        let config = ClientConfig::resolve_with(ClientOptions::new(), lookup).unwrap();
        assert_eq!(config.api_key(), "key");
        assert_eq!(config.packing_base_url(), "https://packing.example.com");
        assert_eq!(config.meshing_base_url(), "https://meshing.example.com");
    }

    #[test]
    fn test_missing_url() {
        let options = ClientOptions::new()
            .with_api_key("key")
            .with_packing_api_url("https://packing.example.com");
        let err = ClientConfig::resolve_with(options, |_| None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("meshing"));
    }

    #[test]
    fn test_invalid_url() {
        let err = ClientConfig::new("key", "not a url", "https://m.example.com").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = ClientConfig::new("key", "ftp://p.example.com", "https://m.example.com")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_endpoint_url() {
        let config =
            ClientConfig::new("key", "http://localhost:8000/", "http://localhost:9000").unwrap();
        assert_eq!(
            config.endpoint_url(Service::Packing, "/pack"),
            "http://localhost:8000/pack"
        );
        assert_eq!(
            config.endpoint_url(Service::Meshing, "status"),
            "http://localhost:9000/status"
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ClientConfig::new("secret-key", "http://a.test", "http://b.test").unwrap();
        let text = format!("{:?}", config);
        assert!(!text.contains("secret-key"));
        assert!(text.contains("redacted"));
    }
}
