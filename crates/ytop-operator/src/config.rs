//! Command line and environment configuration

use clap::Parser;

use ytop_common::consts::DEFAULT_CLUSTER_DOMAIN;
use ytop_common::telemetry::LogFormat;

/// ytop - Kubernetes operator for Ytsaurus clusters
#[derive(Parser, Debug)]
#[command(name = "ytop-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the Ytsaurus CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "YTOP_NAMESPACE")]
    pub namespace: Option<String>,

    /// DNS domain of the Kubernetes cluster
    #[arg(long, env = "YTOP_CLUSTER_DOMAIN", default_value = DEFAULT_CLUSTER_DOMAIN)]
    pub cluster_domain: String,

    /// Maximum number of clusters reconciled at the same time
    #[arg(
        long,
        env = "YTOP_CONCURRENCY",
        default_value_t = 4,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub concurrency: u16,

    /// Log output format: json or text
    #[arg(long, env = "YTOP_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}
