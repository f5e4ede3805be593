use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dayflow::app::notifications::{unread_count, NotificationService};
use dayflow::app::read_state::ReadStateStore;
use dayflow::config::{AppConfig, ReadStateBackend};
use dayflow::domain::session::Session;
use dayflow::infra::gateway::Authenticator;
use dayflow::infra::{cache::RedisCache, kv::KeyValueStore, kv::MemoryStore, odoo::OdooClient};
use dayflow::jobs::notification_poller::NotificationPoller;
use dayflow::{http, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let kv: Arc<dyn KeyValueStore> = match config.read_state_backend {
        ReadStateBackend::Redis => Arc::new(RedisCache::connect(&config.redis_url).await?),
        ReadStateBackend::Memory => {
            tracing::warn!("using in-memory read state; dismissals are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let odoo = Arc::new(OdooClient::new(&config)?);
    let read_state = ReadStateStore::new(
        kv.clone(),
        config.read_state_namespace.clone(),
        config.odoo_db.clone(),
    )
    .with_retention(config.read_state_retention_days);

    let state = AppState {
        gateway: odoo.clone(),
        authenticator: odoo,
        kv,
        read_state,
        notification_settings: config.notification_settings(),
        session_key: config.session_key,
        session_ttl_minutes: config.session_ttl_minutes,
    };

    match config.app_mode.as_str() {
        "api" => {
            let app: Router = http::router(state).layer(TraceLayer::new_for_http());
            let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
            tracing::info!("listening on {}", config.http_addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        "watch" => {
            tracing::info!("starting watch mode");
            run_watch(&config, state).await?;
        }
        other => return Err(anyhow!("unknown APP_MODE: {}", other)),
    }

    Ok(())
}

/// Polls on behalf of one account and logs every change until shutdown.
async fn run_watch(config: &AppConfig, state: AppState) -> anyhow::Result<()> {
    let (login, password) = match (&config.watch_login, &config.watch_password) {
        (Some(login), Some(password)) => (login.clone(), password.clone()),
        _ => return Err(anyhow!("watch mode requires WATCH_LOGIN and WATCH_PASSWORD")),
    };

    let identity = state
        .authenticator
        .authenticate(&login, &password)
        .await?
        .ok_or_else(|| anyhow!("ERP rejected the watch credentials"))?;
    let session = Session {
        uid: identity.uid,
        login,
        secret: password,
        is_admin: identity.is_admin,
    };

    let service = NotificationService::new(
        state.gateway.clone(),
        state.read_state.clone(),
        state.notification_settings,
    );
    let handle = NotificationPoller::new(
        service,
        session,
        Duration::from_secs(config.poll_interval_seconds),
    )
    .spawn();
    let mut feed = handle.subscribe();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = feed.borrow_and_update().clone();
                tracing::info!(
                    generation = snapshot.generation,
                    total = snapshot.notifications.len(),
                    unread = unread_count(&snapshot.notifications),
                    "notifications refreshed"
                );
                for notification in snapshot.notifications.iter().filter(|n| !n.read) {
                    tracing::debug!(
                        id = %notification.id,
                        priority = ?notification.priority,
                        "{}",
                        notification.title
                    );
                }
            }
            _ = &mut shutdown => break,
        }
    }

    handle.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
