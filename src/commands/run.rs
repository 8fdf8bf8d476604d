use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use kube::api::ListParams;
use kube::{Api, Client};
use kube_runtime::watcher::{watcher, Config, Event};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use pepr_report::controller::{self, ReconcileEvent};
use pepr_report::crd::Exemption;
use pepr_report::exemptions::ExemptionRef;
use pepr_report::server::{build_ingest_router, IngestState};

/// Queue depth for the serialized reconcile loop. Producers block (briefly)
/// rather than drop when the consumer falls behind.
const EVENT_QUEUE_DEPTH: usize = 256;

/* ============================= ENTRY ============================= */

pub async fn run(listen: &str, sync_timeout_secs: u64) -> Result<()> {
    println!("Starting pepr-report controller...\n");
    info!("controller_starting");

    let sync_timeout = Duration::from_secs(sync_timeout_secs);

    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster")?;

    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    let addr: SocketAddr = listen.parse().context("Invalid listen address")?;

    let (events_tx, events_rx) = mpsc::channel::<ReconcileEvent>(EVENT_QUEUE_DEPTH);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Seed the index from a full list before watching, so the first report
    // reflects every exemption already in the cluster.
    print!("  Exemption re-list ........... ");
    let exemptions_api: Api<Exemption> = Api::all(client.clone());
    let initial = exemptions_api
        .list(&ListParams::default())
        .await
        .context("Failed to list exemptions")?;
    println!("OK ({} found)", initial.items.len());
    events_tx
        .send(ReconcileEvent::ExemptionsResynced(initial.items))
        .await
        .context("Reconcile queue closed before startup")?;

    println!("  Exemption watch ............. Exemption.uds.dev/v1alpha1");
    println!("  Ingest endpoint ............. http://{addr}");
    println!("  Sync timeout ................ {sync_timeout_secs}s");
    println!();
    println!("  Available endpoints:");
    println!("    POST /evaluations ......... Evaluation ingest (single or batch)");
    println!("    GET  /healthz ............. Liveness probe");
    println!("    GET  /readyz .............. Readiness probe");
    println!("    GET  /metrics ............. Prometheus metrics");
    println!();
    println!("Controller running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    let loop_client = client.clone();
    let loop_shutdown = shutdown_tx.subscribe();
    let loop_handle = tokio::spawn(async move {
        controller::run_event_loop(loop_client, events_rx, loop_shutdown, sync_timeout).await
    });

    let watch_tx = events_tx.clone();
    let watch_shutdown = shutdown_tx.subscribe();
    let watch_handle = tokio::spawn(async move {
        watch_exemptions(exemptions_api, watch_tx, watch_shutdown).await
    });

    let http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        serve_ingest(addr, events_tx, http_shutdown).await
    });

    signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    println!("\n{}", "=".repeat(70));
    println!("Shutdown signal received. Stopping controller...");
    println!("{}", "=".repeat(70));

    let _ = shutdown_tx.send(());

    let _ = watch_handle.await?;
    let _ = http_handle.await?;
    let _ = loop_handle.await?;

    info!("controller_stopped");
    println!("Controller stopped.");
    Ok(())
}

/* ============================= EXEMPTION WATCH ============================= */

/// Translate the Exemption watch stream into queue events. A restarted watch
/// re-lists, which the controller turns into a full index rebuild.
async fn watch_exemptions(
    api: Api<Exemption>,
    events: mpsc::Sender<ReconcileEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut stream = watcher(api, Config::default()).boxed();

    loop {
        tokio::select! {
            maybe_event = stream.next() => {
                match maybe_event {
                    Some(Ok(Event::Applied(exemption))) => {
                        let _ = events
                            .send(ReconcileEvent::ExemptionApplied(Box::new(exemption)))
                            .await;
                    }
                    Some(Ok(Event::Deleted(exemption))) => {
                        let _ = events
                            .send(ReconcileEvent::ExemptionDeleted(ExemptionRef::from_resource(
                                &exemption,
                            )))
                            .await;
                    }
                    Some(Ok(Event::Restarted(exemptions))) => {
                        let _ = events
                            .send(ReconcileEvent::ExemptionsResynced(exemptions))
                            .await;
                    }
                    Some(Err(e)) => {
                        // The watcher re-establishes itself; just record it
                        warn!(error = %e, "exemption_watch_error");
                    }
                    None => break,
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    info!("exemption_watch_stopped");
    Ok(())
}

/* ============================= INGEST SERVER ============================= */

async fn serve_ingest(
    addr: SocketAddr,
    events: mpsc::Sender<ReconcileEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = build_ingest_router(IngestState { events });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind ingest listener")?;

    info!(addr = %addr, "ingest_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .context("Ingest server failed")?;

    info!("ingest_server_stopped");
    Ok(())
}
