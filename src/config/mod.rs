//! Typed configuration from environment variables.
//!
//! Loaded once at startup and passed explicitly to each component. Fails fast
//! if a required variable is missing or a value does not parse. Sensitive
//! values are wrapped in `SecretString` to keep them out of logs.

pub mod secrets;

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::{self, RetryPolicy};
use crate::error::{Error, Result};
use secrecy::SecretString;

pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.telegram.org";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Shared secret callers present in `x-api-key`.
    pub api_secret: SecretString,
    pub provider: ProviderConfig,
    pub notify: NotifyConfig,
    pub retry: RetryPolicy,
    /// Concurrent worker deliveries against the provider.
    pub worker_concurrency: usize,
    /// pgmq visibility timeout for in-flight work items.
    pub visibility_timeout_secs: i32,
    pub listen_addr: SocketAddr,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

#[derive(Debug)]
pub struct ProviderConfig {
    pub base_url: String,
    pub token: SecretString,
    pub chat_id: String,
    /// Lifetime of generated invites. `None` = no expiry.
    pub invite_ttl: Option<Duration>,
}

#[derive(Debug)]
pub struct NotifyConfig {
    pub url: String,
    pub api_key: Option<SecretString>,
    /// Fire "invite_joined" on the first confirmed join.
    pub on_join: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let retry = RetryPolicy::new(
            vars.parsed("MAX_ATTEMPTS")?
                .unwrap_or(backoff::DEFAULT_MAX_ATTEMPTS),
            vars.parsed("BACKOFF_BASE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(backoff::DEFAULT_BASE_DELAY),
            vars.parsed("BACKOFF_CAP_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(backoff::DEFAULT_MAX_DELAY),
        );

        let worker_concurrency: usize = vars.parsed("WORKER_CONCURRENCY")?.unwrap_or(1);
        if worker_concurrency == 0 {
            return Err(Error::Config("WORKER_CONCURRENCY must be at least 1".to_string()));
        }

        Ok(Self {
            database_url: SecretString::from(vars.required("DATABASE_URL")?),
            api_secret: SecretString::from(vars.required("API_SECRET")?),
            provider: ProviderConfig {
                base_url: vars
                    .optional("PROVIDER_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string()),
                token: SecretString::from(vars.required("PROVIDER_TOKEN")?),
                chat_id: vars.required("PROVIDER_CHAT_ID")?,
                invite_ttl: vars.parsed("INVITE_TTL_SECS")?.map(Duration::from_secs),
            },
            notify: NotifyConfig {
                url: vars.required("NOTIFY_URL")?,
                api_key: vars.optional("NOTIFY_API_KEY").map(SecretString::from),
                on_join: vars.flag("NOTIFY_ON_JOIN")?.unwrap_or(true),
            },
            retry,
            worker_concurrency,
            visibility_timeout_secs: vars.parsed("VISIBILITY_TIMEOUT_SECS")?.unwrap_or(60),
            listen_addr: vars
                .parsed("LISTEN_ADDR")?
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080))),
            otel_endpoint: vars.optional("OTEL_ENDPOINT"),
            log_level: vars
                .optional("LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
    }

    fn parsed<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(name)
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}")))
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> Result<Option<bool>> {
        self.optional(name)
            .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::Config(format!("{name}={raw:?} is not a boolean"))),
            })
            .transpose()
    }
}
