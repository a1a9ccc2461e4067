//! Environment-sourced configuration.
//!
//! Loaded once at startup (after `dotenvy` has read `.env`) and handed to the
//! router inside `AppState`; nothing reads the environment after that.

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Restrictions applied to `/upload-by-link` downloads.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    /// When set, only these hosts may be fetched from.
    pub allowed_hosts: Option<Vec<String>>,
    /// Without an allow-list, loopback, private, link-local and unspecified
    /// addresses are refused unless this is set.
    pub allow_private: bool,
    pub max_bytes: u64,
    pub timeout: Duration,
}

impl LinkPolicy {
    /// Whether targets must be checked for non-public addresses.
    pub fn public_only(&self) -> bool {
        self.allowed_hosts.is_none() && !self.allow_private
    }
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            allowed_hosts: None,
            allow_private: false,
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Longest session lifetime `TOKEN_TTL_SECS` may ask for (one year).
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub jwt_secret: String,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub client_origin: String,
    pub bcrypt_cost: u32,
    pub token_ttl: Option<Duration>,
    pub link_policy: LinkPolicy,
    pub upload_max_bytes: usize,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let allowed_hosts = optional("LINK_ALLOWED_HOSTS").map(|hosts| {
            hosts
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect::<Vec<_>>()
        });

        let bcrypt_cost: u32 = parse_or("BCRYPT_COST", 10)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
                reason: "must be within 4..=31".to_string(),
            });
        }

        Ok(Self {
            database_path: optional("DATABASE_PATH")
                .unwrap_or_else(|| "house_data".to_string())
                .into(),
            jwt_secret,
            port: parse_or("PORT", 4000)?,
            uploads_dir: optional("UPLOADS_DIR")
                .unwrap_or_else(|| "uploads".to_string())
                .into(),
            client_origin: optional("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://127.0.0.1:5173".to_string()),
            bcrypt_cost,
            token_ttl: optional("TOKEN_TTL_SECS")
                .map(|v| token_ttl(&v))
                .transpose()?,
            link_policy: LinkPolicy {
                allowed_hosts,
                allow_private: parse_or("LINK_ALLOW_PRIVATE", false)?,
                max_bytes: parse_or("LINK_MAX_BYTES", 10 * 1024 * 1024)?,
                timeout: Duration::from_secs(parse_or("LINK_TIMEOUT_SECS", 15)?),
            },
            upload_max_bytes: parse_or("UPLOAD_MAX_BYTES", 50 * 1024 * 1024)?,
            log_dir: optional("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn token_ttl(value: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_value("TOKEN_TTL_SECS", value)?;
    if secs == 0 || secs > MAX_TOKEN_TTL_SECS {
        return Err(ConfigError::Invalid {
            key: "TOKEN_TTL_SECS",
            value: value.to_string(),
            reason: format!("must be within 1..={MAX_TOKEN_TTL_SECS}"),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
