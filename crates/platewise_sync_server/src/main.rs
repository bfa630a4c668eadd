use axum::{
    Router,
    extract::Extension,
    http::{Method, header},
    routing::get,
};
use platewise_sync_server::{
    auth::{Gatekeeper, OriginPolicy},
    config::Config,
    db::{SessionRepo, init_database},
    handlers::{
        admin::AdminState, admin_routes, auth::AuthState, auth_routes, sync::SyncState,
        sync_routes,
    },
    proxy::{CloseReason, ConnectionRegistry, ProxySettings, SyncProxy, TungsteniteConnector},
};
use rusqlite::Connection;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "platewise_sync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Platewise Sync Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {:?}", config.database_path);
    info!("Upstream: {}", config.internal_sync_url);
    info!("CORS origins: {:?}", config.cors_origins);

    // Initialize database
    let conn = match Connection::open(&config.database_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_database(&conn) {
        error!("Failed to initialize database: {}", e);
        std::process::exit(1);
    }

    // Create shared state
    let sessions = SessionRepo::new(conn);
    let registry = Arc::new(ConnectionRegistry::new());
    let gatekeeper = Arc::new(Gatekeeper::new(
        sessions.clone(),
        registry.clone(),
        &config.rate_limit,
        config.session.ttl,
    ));
    let connector = Arc::new(TungsteniteConnector::new(
        config.internal_sync_url.clone(),
        config.proxy.upstream_connect_timeout,
    ));
    let proxy = SyncProxy::new(
        connector,
        registry.clone(),
        sessions,
        ProxySettings::from(&config.proxy),
    );

    let sync_state = SyncState {
        gatekeeper: gatekeeper.clone(),
        proxy,
        cookie_name: config.session.cookie_name.clone(),
    };
    let auth_state = AuthState {
        gatekeeper: gatekeeper.clone(),
        cookie_name: config.session.cookie_name.clone(),
    };
    let admin_state = AdminState {
        gatekeeper: gatekeeper.clone(),
        admin_secret: config.admin_secret.clone(),
        cookie_name: config.session.cookie_name.clone(),
    };

    // Build CORS layer
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
        .allow_origin(AllowOrigin::list(origins));

    // Build the router
    let app = Router::new()
        .route("/", get(|| async { "Platewise Sync Gateway" }))
        .route("/health", get(|| async { "OK" }))
        .merge(sync_routes(sync_state))
        .nest("/auth", auth_routes(auth_state))
        .nest("/admin", admin_routes(admin_state))
        .layer(Extension(OriginPolicy {
            trust_forwarded_for: config.rate_limit.trust_forwarded_for,
        }))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Start cleanup task
    let cleanup_gatekeeper = gatekeeper.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match cleanup_gatekeeper.sweep() {
                Ok(deleted) => info!("Cleaned up {} expired sessions", deleted),
                Err(e) => error!("Session cleanup failed: {}", e),
            }
        }
    });

    // Run server
    let shutdown_registry = registry.clone();
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let closed = shutdown_registry.close_all(CloseReason::Shutdown);
        info!("Closing {} open connections", closed);
    })
    .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    // Upgraded sockets outlive `axum::serve`; let them send their close frames.
    let grace = config.proxy.drain_timeout * 3;
    if !registry.wait_idle(grace).await {
        warn!(
            "{} connections still open after {:?}",
            registry.total_connections(),
            grace
        );
    }

    info!("Server shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
