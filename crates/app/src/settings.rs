//! Handles settings for the application. Configuration is read from an
//! optional `settings.toml`, overridden by `LEDGERLINE__`-prefixed
//! environment variables (`LEDGERLINE__DATABASE__URL`, ...).
use std::fmt;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    #[serde(default = "default_level")]
    pub level: String,
    /// Log every open unit of work at this interval. Disabled when unset.
    pub open_units_interval_secs: Option<u64>,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: default_level(),
            open_units_interval_secs: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Database {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Role that creates tenant roles. Tenant roles always join
    /// `ledger::GROUP_ROLE`.
    pub admin_role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaidEnvironment {
    Sandbox,
    Production,
}

impl PlaidEnvironment {
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.plaid.com",
            Self::Production => "https://production.plaid.com",
        }
    }
}

#[derive(Deserialize)]
pub struct Plaid {
    pub client_id: String,
    pub secret: String,
    pub environment: PlaidEnvironment,
}

impl fmt::Debug for Plaid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plaid")
            .field("client_id", &self.client_id)
            .field("secret", &"***")
            .field("environment", &self.environment)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    pub database: Database,
    pub server: Server,
    pub plaid: Plaid,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_url() -> String {
    "sqlite:./ledgerline.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings").required(false))
            .add_source(
                Environment::with_prefix("LEDGERLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}
