use std::time::Duration;
use url::Url;

const DEFAULT_TABLE_NAME: &str = "maestro-admin";
const DEFAULT_BUCKET_NAME: &str = "maestro-catalog";
pub const DEFAULT_UPSTREAM_HOST: &str = "firebasestorage.googleapis.com";
const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROXY_MAX_ATTEMPTS: u32 = 2;
const MAX_PROXY_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Settings for the image proxy's upstream fetch
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Host the proxy is allowed to fetch from. Also the marker the URL
    /// resolver looks for.
    pub upstream_host: String,
    pub timeout: Duration,
    /// Total attempts per request, first try included
    pub max_attempts: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_host: DEFAULT_UPSTREAM_HOST.to_string(),
            timeout: Duration::from_secs(DEFAULT_PROXY_TIMEOUT_SECS),
            max_attempts: DEFAULT_PROXY_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub bucket_name: String,
    pub public_base_url: String,
    pub cognito_client_id: String,
    pub cognito_client_secret: Option<String>,
    pub proxy: ProxyConfig,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Treat empty values the same as unset ones
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let table_name = get("TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());
        let bucket_name = get("BUCKET_NAME").unwrap_or_else(|| DEFAULT_BUCKET_NAME.to_string());
        let public_base_url = get("OBJECT_PUBLIC_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", bucket_name));

        let cognito_client_id =
            get("COGNITO_CLIENT_ID").ok_or(ConfigError::Missing("COGNITO_CLIENT_ID"))?;
        let cognito_client_secret = get("COGNITO_CLIENT_SECRET");

        // Uploaded images must land on the host the proxy serves
        let public_host = Url::parse(&public_base_url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.to_ascii_lowercase()))
            .ok_or_else(|| ConfigError::Invalid {
                name: "OBJECT_PUBLIC_BASE_URL",
                value: public_base_url.clone(),
            })?;
        let upstream_host = match get("UPSTREAM_HOST") {
            Some(host) if host.eq_ignore_ascii_case(&public_host) => public_host,
            Some(host) => {
                return Err(ConfigError::Invalid {
                    name: "UPSTREAM_HOST",
                    value: host,
                })
            }
            None => public_host,
        };

        let timeout_secs = match get("PROXY_TIMEOUT_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "PROXY_TIMEOUT_SECS",
                        value,
                    })
                }
            },
            None => DEFAULT_PROXY_TIMEOUT_SECS,
        };

        let max_attempts = match get("PROXY_MAX_ATTEMPTS") {
            Some(value) => match value.parse::<u32>() {
                Ok(n) if (1..=MAX_PROXY_ATTEMPTS).contains(&n) => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "PROXY_MAX_ATTEMPTS",
                        value,
                    })
                }
            },
            None => DEFAULT_PROXY_MAX_ATTEMPTS,
        };

        Ok(Self {
            table_name,
            bucket_name,
            public_base_url,
            cognito_client_id,
            cognito_client_secret,
            proxy: ProxyConfig {
                upstream_host,
                timeout: Duration::from_secs(timeout_secs),
                max_attempts,
            },
        })
    }
}
