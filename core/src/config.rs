//! Credentials and broker settings.
//!
//! `Credentials` are immutable once a broker is built. `from_env` loads a
//! `.env` file when one exists, then reads `SFDC_*` variables.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_LOGIN_HOST: &str = "login.salesforce.com";
pub const DEFAULT_API_VERSION: &str = "v25.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
}

/// Login material for the password grant.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    #[serde(default = "default_login_host")]
    pub login_host: String,
    pub username: String,
    pub password: String,
    /// Security token appended to the password at login.
    #[serde(default)]
    pub credential: String,
    pub client_id: String,
    pub client_secret: String,
}

fn default_login_host() -> String {
    DEFAULT_LOGIN_HOST.to_string()
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::MissingVar(key));
        Ok(Credentials {
            login_host: lookup("SFDC_LOGIN_HOST").unwrap_or_else(default_login_host),
            username: required("SFDC_USERNAME")?,
            password: required("SFDC_PASSWORD")?,
            credential: lookup("SFDC_CREDENTIAL").unwrap_or_default(),
            client_id: required("SFDC_CLIENT_ID")?,
            client_secret: required("SFDC_CLIENT_SECRET")?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login_host", &self.login_host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("credential", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Transport and URL settings shared by every session of a broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub api_version: String,
    /// `https` in production; tests against a local server use `http`.
    pub scheme: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            api_version: DEFAULT_API_VERSION.to_string(),
            scheme: "https".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
