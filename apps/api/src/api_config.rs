use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dlsgate_core::AppError;
use dlsgate_domain::RuleLayout;
use dlsgate_infrastructure::{ClientIdentityPaths, HttpPermissionStoreConfig};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, Clone)]
pub enum LedgerBackendConfig {
    Postgres { database_url: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub ledger_backend: LedgerBackendConfig,
    pub api_host: String,
    pub api_port: u16,
    pub admin_token: String,
    pub grant_window: chrono::Duration,
    pub reconcile_interval: Duration,
    pub permission_store: HttpPermissionStoreConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

        let ledger_backend = match env::var("LEDGER_BACKEND")
            .unwrap_or_else(|_| "postgres".to_owned())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => LedgerBackendConfig::Postgres {
                database_url: required_non_empty_env("DATABASE_URL")?,
            },
            "memory" => LedgerBackendConfig::Memory,
            other => {
                return Err(AppError::Validation(format!(
                    "LEDGER_BACKEND must be either 'postgres' or 'memory', got '{other}'"
                )));
            }
        };

        if migrate_only && matches!(ledger_backend, LedgerBackendConfig::Memory) {
            return Err(AppError::Validation(
                "the migrate command requires LEDGER_BACKEND=postgres".to_owned(),
            ));
        }

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = parsed_env("API_PORT", 8080_u16)?;
        let admin_token = required_non_empty_env("ADMIN_TOKEN")?;

        let grant_window_minutes = parsed_env("GRANT_WINDOW_MINUTES", 120_i64)?;
        let reconcile_interval_seconds = parsed_env("RECONCILE_INTERVAL_SECONDS", 60_u64)?;
        if grant_window_minutes <= 0 || reconcile_interval_seconds == 0 {
            return Err(AppError::Validation(
                "GRANT_WINDOW_MINUTES and RECONCILE_INTERVAL_SECONDS must be positive".to_owned(),
            ));
        }

        let grant_window = chrono::Duration::try_minutes(grant_window_minutes).ok_or_else(|| {
            AppError::Validation(format!(
                "GRANT_WINDOW_MINUTES is out of range: {grant_window_minutes}"
            ))
        })?;

        Ok(Self {
            migrate_only,
            ledger_backend,
            api_host,
            api_port,
            admin_token,
            grant_window,
            reconcile_interval: Duration::from_secs(reconcile_interval_seconds),
            permission_store: permission_store_config()?,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Internal(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

fn permission_store_config() -> Result<HttpPermissionStoreConfig, AppError> {
    let raw_url =
        env::var("PERMISSION_STORE_URL").unwrap_or_else(|_| "https://localhost:9200".to_owned());
    let base_url = Url::parse(raw_url.trim())
        .map_err(|error| AppError::Validation(format!("invalid PERMISSION_STORE_URL: {error}")))?;

    let role_name = env::var("PERMISSION_STORE_ROLE").unwrap_or_else(|_| "my_role".to_owned());
    let username = env::var("PERMISSION_STORE_USERNAME").unwrap_or_else(|_| "admin".to_owned());
    let password = env::var("PERMISSION_STORE_PASSWORD").unwrap_or_else(|_| "admin".to_owned());
    let basic_auth = (!username.trim().is_empty()).then_some((username, password));

    let certificate = env::var("PERMISSION_STORE_CLIENT_CERT").unwrap_or_else(|_| "cert.pem".to_owned());
    let key = env::var("PERMISSION_STORE_CLIENT_KEY").unwrap_or_else(|_| "cert.key".to_owned());
    let client_identity = match (certificate.trim().is_empty(), key.trim().is_empty()) {
        (true, true) => None,
        (false, false) => Some(ClientIdentityPaths {
            certificate_path: PathBuf::from(certificate),
            key_path: PathBuf::from(key),
        }),
        _ => {
            return Err(AppError::Validation(
                "PERMISSION_STORE_CLIENT_CERT and PERMISSION_STORE_CLIENT_KEY must be set together"
                    .to_owned(),
            ));
        }
    };

    let ca_certificate_path = env::var("PERMISSION_STORE_CA_CERT")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);

    let accept_invalid_certs = env::var("PERMISSION_STORE_ACCEPT_INVALID_CERTS")
        .unwrap_or_else(|_| "false".to_owned())
        .eq_ignore_ascii_case("true");

    let timeout_seconds = parsed_env("PERMISSION_STORE_TIMEOUT_SECONDS", 15_u64)?;

    let layout = env::var("PERMISSION_RULE_LAYOUT")
        .unwrap_or_else(|_| "merged".to_owned())
        .parse::<RuleLayout>()?;

    Ok(HttpPermissionStoreConfig {
        base_url,
        role_name,
        basic_auth,
        client_identity,
        ca_certificate_path,
        accept_invalid_certs,
        timeout: Duration::from_secs(timeout_seconds),
        layout,
    })
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parsed_env<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        _ => Ok(default),
    }
}

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn required_non_empty_env(name: &str) -> Result<String, AppError> {
    let value = required_env(name)?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}
