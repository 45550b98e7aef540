//! Runtime settings read from the environment (and a `.env` file when present).

use crate::error::{DashboardError, Result};
use std::path::PathBuf;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_USERS_FILE: &str = "data/users.json";
pub const DEFAULT_SESSION_HOURS: u64 = 12;
pub const DEFAULT_SMTP_HOST: &str = "smtp.office365.com";

/// Outbound mail sender parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailSettings {
    pub tenant: String,
    pub client_id: String,
    pub client_secret: String,
    pub sender: String,
    pub smtp_host: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub bind: String,
    pub data_dir: PathBuf,
    pub users_file: PathBuf,
    pub session_hours: u64,
    /// `None` unless tenant, client id, secret and sender are all set.
    pub mail: Option<MailSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind: DEFAULT_BIND.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            users_file: PathBuf::from(DEFAULT_USERS_FILE),
            session_hours: DEFAULT_SESSION_HOURS,
            mail: None,
        }
    }
}

impl Settings {
    /// Loads `.env` if there is one, then reads the `GESTION_*` variables.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            log::debug!("loaded environment from {}", path.display());
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        let session_hours = match get("GESTION_SESSION_HOURS") {
            Some(v) => v.parse::<u64>().map_err(|_| {
                DashboardError::Config(format!("GESTION_SESSION_HOURS is not a number: {}", v))
            })?,
            None => defaults.session_hours,
        };
        if session_hours == 0 {
            return Err(DashboardError::Config(
                "GESTION_SESSION_HOURS must be at least 1".to_string(),
            ));
        }

        let mail = match (
            get("GESTION_MAIL_TENANT"),
            get("GESTION_MAIL_CLIENT_ID"),
            get("GESTION_MAIL_CLIENT_SECRET"),
            get("GESTION_MAIL_SENDER"),
        ) {
            (Some(tenant), Some(client_id), Some(client_secret), Some(sender)) => Some(MailSettings {
                tenant,
                client_id,
                client_secret,
                sender,
                smtp_host: get("GESTION_MAIL_SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            }),
            _ => None,
        };

        Ok(Settings {
            bind: get("GESTION_BIND").unwrap_or(defaults.bind),
            data_dir: get("GESTION_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            users_file: get("GESTION_USERS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.users_file),
            session_hours,
            mail,
        })
    }
}
