use std::time::Duration;

use clap::{Parser, ValueEnum};
use training_scheduler::GangScheduler;

/// Kubernetes operator running TrainingJob resources
#[derive(Parser, Debug, Clone)]
#[command(name = "training-operator", version, about)]
pub struct OperatorConfig {
    /// Gang scheduler for job pods: none, volcano or scheduler-plugins
    #[arg(long, env = "GANG_SCHEDULER_NAME", default_value = "none")]
    pub gang_scheduler: GangScheduler,

    /// Only watch jobs in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// How often a running job is re-examined without watch events
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub requeue_interval: Duration,

    /// Back-off before retrying a failed reconcile
    #[arg(long, default_value = "15s", value_parser = humantime::parse_duration)]
    pub error_requeue: Duration,

    /// Do not install or update the TrainingJob CRD on start-up
    #[arg(long)]
    pub skip_crd_install: bool,

    /// Field manager used for server-side apply and status writes
    #[arg(long, default_value = "training-operator")]
    pub field_manager: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
