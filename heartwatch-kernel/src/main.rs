/**
 * HEARTWATCH KERNEL - Point d'entrée du moniteur
 *
 * RÔLE : Orchestration de tous les modules : config, canaux, registre, MQTT,
 * sweeper, health, HTTP. Arrêt propre sur Ctrl-C (drain des alertes en cours).
 *
 * ARCHITECTURE : une boucle de réception par groupe + un sweeper périodique +
 * des tâches d'alerte bornées, tous autour du même registre injecté.
 */

use anyhow::Context;
use heartwatch_kernel::channels;
use heartwatch_kernel::config::load_config;
use heartwatch_kernel::directory::{Directory, StaticDirectory};
use heartwatch_kernel::health::HealthTracker;
use heartwatch_kernel::http::{self, AppState};
use heartwatch_kernel::mqtt;
use heartwatch_kernel::{
    AlertDispatcher, DeviceRegistry, DispatchSettings, HeartbeatProcessor, InactivitySweeper,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await.context("failed to load configuration")?;

    // annuaire + canaux : une erreur ici est fatale
    let directory = StaticDirectory::from_config(&cfg.directory);
    if directory.recipient_count() == 0 {
        warn!("[kernel] no team member with an e-mail address, e-mail alerts will have no recipient");
    } else {
        info!("[kernel] {} e-mail recipients in team \"{}\"", directory.recipient_count(), cfg.directory.team_name);
    }
    let directory: Arc<dyn Directory> = Arc::new(directory);
    let configured = channels::from_config(&cfg).context("failed to set up notification channels")?;

    let registry = DeviceRegistry::shared();
    let dispatcher = AlertDispatcher::new(directory, configured.notifiers, DispatchSettings::from_config(&cfg));
    let processor = HeartbeatProcessor::new(registry.clone(), dispatcher.clone());
    let health_tracker = HealthTracker::new();
    let cancel = CancellationToken::new();

    info!(
        "[kernel] starting monitor for group \"{}\" (inactivity timeout {}, channels: {:?})",
        cfg.group_id,
        humantime::format_duration(cfg.inactivity_timeout),
        dispatcher.channel_names()
    );

    if let Some(webhook) = &configured.webhook {
        if let Err(e) = webhook.post_info("Heartwatch monitor started").await {
            warn!("[kernel] startup notice not delivered: {e}");
        }
    }

    let sweeper = InactivitySweeper::new(registry.clone(), dispatcher.clone(), cfg.inactivity_timeout, cfg.sweep_interval);
    let sweeper_task = tokio::spawn(sweeper.run(cancel.clone()));

    let reporter_task = health_tracker.spawn_health_reporter(
        registry.clone(),
        dispatcher.clone(),
        cfg.health_report_interval,
        cancel.clone(),
    );

    let http_task = match &cfg.http {
        Some(http_cfg) => {
            let app = http::build_router(AppState {
                registry: registry.clone(),
                dispatcher: dispatcher.clone(),
                health_tracker: health_tracker.clone(),
                inactivity_timeout: cfg.inactivity_timeout,
            });
            let listener = TcpListener::bind(http_cfg.bind.as_str())
                .await
                .with_context(|| format!("cannot bind HTTP listener on {}", http_cfg.bind))?;
            info!("[kernel] listening on http://{}", http_cfg.bind);
            let shutdown = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
                {
                    error!("[kernel] HTTP server error: {e}");
                }
            }))
        }
        None => None,
    };

    let receive_task = tokio::spawn(mqtt::run_receive_loop(
        cfg.clone(),
        processor,
        health_tracker.clone(),
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await.context("cannot listen for shutdown signal")?;
    info!("[kernel] shutdown requested");
    cancel.cancel();

    let _ = receive_task.await;
    let _ = sweeper_task.await;
    let _ = reporter_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
    dispatcher.shutdown().await;
    info!("[kernel] stopped");
    Ok(())
}
