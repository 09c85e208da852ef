use portcullis_identity::{ExternalProvider, RoleAdministrator};
use portcullis_server::{
    app,
    auth::{
        self, AppState, OAuthProviderClient, RedirectPaths,
        db::{PgCredentialStore, PgSessionStore},
    },
    config::ServerConfig,
    error::StartupError,
    pages,
};
use rootcause::prelude::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Report<StartupError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    let policies = config.policy_registry().map_err(StartupError::Policy)?;
    let bootstrap = config
        .bootstrap_identities()
        .map_err(StartupError::BootstrapAdmin)?;
    tracing::info!(policies = policies.len(), "Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migration {
            details: e.to_string(),
        })?;

    let users = Arc::new(PgCredentialStore::new(db_pool.clone()));
    let sessions = Arc::new(PgSessionStore::new(db_pool));

    if !bootstrap.is_empty() {
        let admin = RoleAdministrator::new(users.clone(), sessions.clone());
        match admin.bootstrap_admins(&bootstrap).await {
            Ok(granted) => tracing::info!(granted, "Bootstrapped administrators"),
            Err(e) => tracing::warn!(error = %e, "Failed to bootstrap administrators"),
        }
    }

    let paths = RedirectPaths {
        login: config.login_path.clone(),
        access_denied: config.access_denied_path.clone(),
    };
    let mut state = AppState::new(
        users,
        sessions,
        policies,
        config.session.clone(),
        paths,
    );

    for (provider, settings) in config.providers.enabled() {
        let client = OAuthProviderClient::new(provider, settings, &config.public_url)
            .map_err(StartupError::Provider)?;
        tracing::info!(%provider, redirect_url = %client.redirect_url(), "Enabled provider");
        state = state.with_provider(Arc::new(client) as Arc<dyn ExternalProvider>);
    }
    if state.providers.is_empty() {
        tracing::warn!("No sign-in providers are configured; nobody can log in");
    }

    let state = Arc::new(state);

    match state.issuer.purge_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(
                deleted_sessions = count,
                "Cleaned up expired sessions on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired sessions on startup");
        }
    }
    let _cleanup = auth::spawn_session_cleanup(
        state.issuer.clone(),
        config.session.cleanup_interval(),
    );

    let app = app::router(state.clone(), pages::router());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| StartupError::Listen {
            address: config.bind_address.clone(),
            details: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Listen {
            address: config.bind_address.clone(),
            details: e.to_string(),
        })?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
