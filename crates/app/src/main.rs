use std::{sync::Arc, time::Duration};

use ledger::{Ledger, RoleConfig, StoreRoles, SyncCoordinator};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use server::ServerState;
use tokio_util::sync::CancellationToken;

mod plaid;
mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;
    let mut tasks = tokio::task::JoinSet::new();
    let shutdown = CancellationToken::new();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "ledgerline={level},server={level},ledger={level}",
            level = settings.app.level
        ))
        .init();

    let db = connect(&settings.database).await?;
    let roles = StoreRoles::new(RoleConfig {
        admin: settings.database.admin_role.clone(),
    });
    let ledger = Ledger::builder().database(db).roles(roles).build().await?;
    tracing::info!(environment = ?settings.plaid.environment, "Found plaid settings...");
    let sync = SyncCoordinator::new(plaid::PlaidSource::new(&settings.plaid));
    let state = ServerState::new(ledger, sync, shutdown.clone());

    if let Some(secs) = settings.app.open_units_interval_secs {
        let ledger = Arc::clone(&state.ledger);
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => ledger.units().log_open_units(),
                }
            }
        });
    }

    let bind = settings
        .server
        .bind
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let addr = format!("{}:{}", bind, settings.server.port);
    tasks.spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!("failed to bind server listener: {err}");
                return;
            }
        };
        if let Err(err) = server::run_with_listener(state, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    let signal = shutdown.clone();
    tasks.spawn(async move {
        tokio::select! {
            _ = signal.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::info!("shutdown requested"),
                Err(err) => tracing::error!("failed to listen for ctrl-c: {err}"),
            },
        }
    });

    // The first task to finish brings the rest down.
    if tasks.join_next().await.is_some() {
        shutdown.cancel();
    }
    while tasks.join_next().await.is_some() {}

    Ok(())
}

async fn connect(
    config: &settings::Database,
) -> Result<DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let mut options = ConnectOptions::new(config.url.clone());
    options.max_connections(config.max_connections);
    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}
