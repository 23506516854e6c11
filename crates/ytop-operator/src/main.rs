//! ytop operator - reconciles Ytsaurus clusters on Kubernetes

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use ytop_common::consts::FIELD_MANAGER;
use ytop_common::crd::Ytsaurus;
use ytop_common::telemetry::{init_telemetry, TelemetryConfig};
use ytop_operator::config::Cli;
use ytop_operator::controller::Context;
use ytop_operator::controller_runner::ytsaurus_controller;

const CRD_NAME: &str = "ytsaurus.cluster.ytsaurus.tech";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Ytsaurus::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "ytop-operator".to_string(),
        log_format: cli.log_format,
    })?;

    let client = Client::try_default().await?;
    ensure_crd_installed(&client).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let ctx = Arc::new(
        Context::builder(client.clone())
            .cluster_domain(cli.cluster_domain.clone())
            .shutdown(shutdown.clone())
            .build(),
    );

    ytsaurus_controller(client, ctx, cli.namespace.as_deref(), cli.concurrency).await;
    shutdown.cancel();
    tracing::info!("controller stopped");
    Ok(())
}

/// Install or refresh the Ytsaurus CRD so it always matches this binary
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("installing Ytsaurus CRD");
    crds.patch(CRD_NAME, &params, &Patch::Apply(&Ytsaurus::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", CRD_NAME, e))?;
    Ok(())
}

/// Cancel in-flight ticks on SIGINT or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown requested, cancelling in-flight reconciles");
    token.cancel();
}
