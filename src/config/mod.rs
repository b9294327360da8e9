//! Configuration module for the Oink backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.
//! Subsystems never read the environment themselves; they receive the derived
//! settings structs below at construction time.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::markup::MarkupMode;

/// Default canonical root for Drive folder links.
pub const DEFAULT_DRIVE_ROOT: &str = "https://drive.google.com/drive/folders";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Service account key: a file path or the inline JSON document
    pub service_account: Option<String>,
    /// Identity the service account impersonates
    pub impersonate_user: Option<String>,
    /// Share newly created folders with anyone holding the link
    pub share_public: bool,
    /// Share newly created folders with this domain
    pub share_domain: Option<String>,
    /// Parent folder for newly created package folders
    pub parent_folder_id: Option<String>,
    /// Root used to build placeholder folder URLs
    pub drive_root: String,
    /// Base URL of the Drive REST API
    pub drive_api_base: String,
    /// Access Drive with this user's stored OAuth credential instead of a service account
    pub drive_user_email: Option<String>,
    /// Copy fetched markup and images into the local blob store
    pub blob_cache_enabled: bool,
    /// Only emails in this domain may sign in
    pub email_domain: String,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub oauth_redirect_url: String,
    /// Directory holding `<slug>/article.aml` samples served when Drive is unreachable
    pub sample_data_dir: PathBuf,
    /// Upper bound for each remote call
    pub remote_timeout: Duration,
    pub markup_mode: MarkupMode,
}

/// Settings consumed by the Drive client and the folder provisioner.
#[derive(Debug, Clone)]
pub struct DriveSettings {
    pub service_account: Option<String>,
    pub impersonate_user: Option<String>,
    pub share_public: bool,
    pub share_domain: Option<String>,
    pub parent_folder_id: Option<String>,
    pub drive_root: String,
    pub api_base: String,
    pub timeout: Duration,
}

/// Settings consumed by the fetch orchestrator.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub blob_cache_enabled: bool,
    pub remote_timeout: Duration,
    pub markup_mode: MarkupMode,
}

/// Settings consumed by the OAuth client.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub email_domain: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = non_empty_var("OINK_API_PSK");

        let db_path = env::var("OINK_DB_PATH")
            .unwrap_or_else(|_| "./data/oink.sqlite".to_string())
            .into();

        let bind_addr = env::var("OINK_BIND_ADDR")
            .ok()
            .and_then(|raw| match raw.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    eprintln!("Invalid OINK_BIND_ADDR {raw:?}, using 127.0.0.1:8080");
                    None
                }
            })
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));

        let log_level = env::var("OINK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = match non_empty_var("OINK_LOG_FORMAT") {
            Some(raw) => LogFormat::from_str(&raw).unwrap_or_else(|| {
                eprintln!("Invalid OINK_LOG_FORMAT {raw:?}, using text");
                LogFormat::Text
            }),
            None => LogFormat::Text,
        };

        // The standard ADC variable is honoured when the explicit one is absent.
        let service_account = non_empty_var("OINK_GOOGLE_SERVICE_ACCOUNT")
            .or_else(|| non_empty_var("GOOGLE_APPLICATION_CREDENTIALS"));

        let remote_timeout = env::var("OINK_REMOTE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let markup_mode = env::var("OINK_MARKUP_PARSER")
            .ok()
            .and_then(|s| MarkupMode::from_str(&s))
            .unwrap_or_default();

        Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            log_format,
            service_account,
            impersonate_user: non_empty_var("OINK_GOOGLE_IMPERSONATE_USER"),
            share_public: flag_var("OINK_GOOGLE_SHARE_PUBLIC"),
            share_domain: non_empty_var("OINK_GOOGLE_SHARE_DOMAIN"),
            parent_folder_id: non_empty_var("OINK_REPOSITORY_FOLDER_ID"),
            drive_root: non_empty_var("OINK_GOOGLE_DRIVE_ROOT")
                .unwrap_or_else(|| DEFAULT_DRIVE_ROOT.to_string()),
            drive_api_base: non_empty_var("OINK_DRIVE_API_BASE")
                .unwrap_or_else(|| "https://www.googleapis.com".to_string()),
            drive_user_email: non_empty_var("OINK_DRIVE_USER_EMAIL"),
            blob_cache_enabled: flag_var("OINK_BLOB_CACHE_ENABLED"),
            email_domain: non_empty_var("OINK_EMAIL_DOMAIN")
                .unwrap_or_else(|| "media.ucla.edu".to_string()),
            google_client_id: non_empty_var("OINK_GOOGLE_CLIENT_ID"),
            google_client_secret: non_empty_var("OINK_GOOGLE_CLIENT_SECRET"),
            oauth_redirect_url: non_empty_var("OINK_OAUTH_REDIRECT_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8080/google/callback".to_string()),
            sample_data_dir: env::var("OINK_SAMPLE_DATA_DIR")
                .unwrap_or_else(|_| "./sample_data".to_string())
                .into(),
            remote_timeout,
            markup_mode,
        }
    }

    pub fn drive_settings(&self) -> DriveSettings {
        DriveSettings {
            service_account: self.service_account.clone(),
            impersonate_user: self.impersonate_user.clone(),
            share_public: self.share_public,
            share_domain: self.share_domain.clone(),
            parent_folder_id: self.parent_folder_id.clone(),
            drive_root: self.drive_root.clone(),
            api_base: self.drive_api_base.clone(),
            timeout: self.remote_timeout,
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            blob_cache_enabled: self.blob_cache_enabled,
            remote_timeout: self.remote_timeout,
            markup_mode: self.markup_mode,
        }
    }

    /// OAuth settings, or `None` when no client credentials are configured.
    pub fn oauth_settings(&self) -> Option<OAuthSettings> {
        let client_id = self.google_client_id.clone()?;
        let client_secret = self.google_client_secret.clone()?;
        Some(OAuthSettings {
            client_id,
            client_secret,
            redirect_url: self.oauth_redirect_url.clone(),
            email_domain: self.email_domain.clone(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v3/userinfo".to_string(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_psk: None,
            db_path: "./data/oink.sqlite".into(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            service_account: None,
            impersonate_user: None,
            share_public: false,
            share_domain: None,
            parent_folder_id: None,
            drive_root: DEFAULT_DRIVE_ROOT.to_string(),
            drive_api_base: "https://www.googleapis.com".to_string(),
            drive_user_email: None,
            blob_cache_enabled: false,
            email_domain: "media.ucla.edu".to_string(),
            google_client_id: None,
            google_client_secret: None,
            oauth_redirect_url: "http://127.0.0.1:8080/google/callback".to_string(),
            sample_data_dir: "./sample_data".into(),
            remote_timeout: Duration::from_secs(30),
            markup_mode: MarkupMode::default(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flag_var(name: &str) -> bool {
    matches!(
        env::var(name).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Ok("1" | "true" | "yes" | "on")
    )
}
