//! Controller runner - wires the Ytsaurus controller to the watch stream

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::{Action, Config as ControllerConfig};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use ytop_common::crd::Ytsaurus;

use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the Ytsaurus controller future; it ends after a shutdown signal
pub fn ytsaurus_controller(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
    concurrency: u16,
) -> impl Future<Output = ()> {
    let clusters: Api<Ytsaurus> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    tracing::info!(namespace = ?namespace, concurrency, "starting Ytsaurus controller");

    Controller::new(clusters, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result)
}

fn log_reconcile_result<E: std::fmt::Debug>(
    result: Result<(ObjectRef<Ytsaurus>, Action), E>,
) -> std::future::Ready<()> {
    match result {
        Ok((object, action)) => tracing::debug!(
            cluster = %object.name,
            namespace = ?object.namespace,
            ?action,
            "reconciliation completed"
        ),
        Err(e) => tracing::error!(error = ?e, "reconciliation error"),
    }
    std::future::ready(())
}
