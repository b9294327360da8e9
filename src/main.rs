//! Oink Backend
//!
//! Content packages mirrored from Google Drive folders, with SQLite persistence and a
//! local blob cache.

mod api;
mod auth;
mod blobs;
mod config;
mod db;
mod drive;
mod errors;
mod fetch;
mod markup;
mod models;
mod oauth;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use blobs::{BlobStore, SqliteBlobStore};
use config::{Config, LogFormat};
use db::Repository;
use drive::{DriveApi, GoogleDrive, Provisioner, UserCredentialTokens};
use fetch::FetchService;
use oauth::OAuthClient;

#[derive(Parser)]
#[command(name = "oink-backend", version, about = "Drive-backed content package service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Verify the service account by listing the repository folder
    CheckGoogleCreds,
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub blobs: Arc<dyn BlobStore>,
    pub drive: Option<Arc<dyn DriveApi>>,
    pub fetcher: Arc<FetchService>,
    pub provisioner: Arc<Provisioner>,
    pub oauth: Option<Arc<OAuthClient>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        repo: Repository,
        blobs: Arc<dyn BlobStore>,
        drive: Option<Arc<dyn DriveApi>>,
        oauth: Option<Arc<OAuthClient>>,
    ) -> Self {
        let fetcher = FetchService::new(
            repo.clone(),
            blobs.clone(),
            drive.clone(),
            config.fetch_settings(),
        );
        let provisioner = Provisioner::new(repo.clone(), drive.clone(), &config.drive_settings());
        Self {
            repo: Arc::new(repo),
            blobs,
            drive,
            fetcher: Arc::new(fetcher),
            provisioner: Arc::new(provisioner),
            oauth,
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::CheckGoogleCreds => check_google_creds(&config).await,
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting Oink Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(
        blob_cache = config.blob_cache_enabled,
        markup_parser = config.markup_mode.as_str(),
        "Fetch settings"
    );

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (OINK_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Repository::new(pool.clone());
    let blobs: Arc<dyn BlobStore> = Arc::new(SqliteBlobStore::new(pool));

    let oauth = match config.oauth_settings() {
        Some(settings) => {
            let http = reqwest::Client::builder()
                .timeout(config.remote_timeout)
                .build()?;
            Some(Arc::new(OAuthClient::new(settings, http)))
        }
        None => {
            tracing::warn!("No Google OAuth client configured; sign-in is disabled");
            None
        }
    };

    let drive = connect_drive(&config, &repo, oauth.clone()).await?;

    let bind_addr = config.bind_addr;
    let state = AppState::new(config, repo, blobs, drive, oauth);

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Drive client for the configured identity: a signed-in user's stored credential when
/// `OINK_DRIVE_USER_EMAIL` is set, otherwise the service account.
async fn connect_drive(
    config: &Config,
    repo: &Repository,
    oauth: Option<Arc<OAuthClient>>,
) -> Result<Option<Arc<dyn DriveApi>>, Box<dyn std::error::Error>> {
    let settings = config.drive_settings();

    if let Some(email) = config.drive_user_email.as_deref() {
        let Some(oauth) = oauth else {
            tracing::warn!(email, "Drive user configured without an OAuth client; Drive is disabled");
            return Ok(None);
        };
        let Some(user) = repo.get_user_by_email(email).await? else {
            tracing::warn!(email, "Drive user has not signed in yet; Drive is disabled");
            return Ok(None);
        };
        let http = GoogleDrive::http_client(&settings)?;
        let tokens = UserCredentialTokens::new(repo.clone(), oauth, user.id);
        tracing::info!(email, "Using stored user credential for Drive");
        return Ok(Some(Arc::new(GoogleDrive::new(
            http,
            &settings.api_base,
            Arc::new(tokens),
        ))));
    }

    match GoogleDrive::from_settings(&settings) {
        Ok(Some(drive)) => {
            tracing::info!("Using service account for Drive");
            Ok(Some(Arc::new(drive)))
        }
        Ok(None) => {
            tracing::warn!("No Drive credentials configured; packages get placeholder folders");
            Ok(None)
        }
        Err(e) => {
            tracing::warn!("Drive credentials unusable, continuing without Drive: {}", e);
            Ok(None)
        }
    }
}

async fn check_google_creds(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config.drive_settings();
    let Some(drive) = GoogleDrive::from_settings(&settings)? else {
        return Err("no service account configured (OINK_GOOGLE_SERVICE_ACCOUNT)".into());
    };

    let folder = settings.parent_folder_id.as_deref().unwrap_or("root");
    let files = drive.list_children(folder).await?;
    tracing::info!(folder, count = files.len(), "Google credentials OK");
    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        .route(
            "/packages",
            get(api::list_packages).post(api::create_package),
        )
        .route(
            "/packages/{slug}",
            get(api::get_package)
                .put(api::update_package)
                .delete(api::delete_package),
        )
        .route(
            "/packages/by-category/{category}/{slug}",
            get(api::get_package_by_category),
        )
        .route("/packages/{slug}/fetch", post(api::fetch_package))
        .route("/packages/{slug}/versions", get(api::list_versions))
        .route("/packages/{slug}/image/{file_id}", get(api::proxy_image))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check, blobs and sign-in (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/files/{blob_id}", get(api::serve_blob))
        .route("/google/login", get(api::google_login))
        .route("/google/callback", get(api::google_callback));

    Router::new()
        .nest("/api", api_routes)
        .merge(public_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
