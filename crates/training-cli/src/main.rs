use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use training_core::JobConditionType;
use training_core::labels::PodSelector;

mod client;
mod config;
mod discovery;
mod error;
mod job;
mod output;
mod pods;
mod spinner;

use client::{JobClient, resolve_namespace};
use job::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "tjob")]
#[command(about = "tjob - manage TrainingJobs on a Kubernetes cluster")]
struct Args {
    /// Path to a kubeconfig file
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,
    /// Namespace of the job
    #[arg(short, long, global = true)]
    namespace: Option<String>,
    /// Log more; repeat for debug output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a TrainingJob from a YAML or JSON manifest
    Create {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Show one TrainingJob, or all of them in the namespace
    Get {
        name: Option<String>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
        /// Print a row on every change until the job finishes
        #[arg(short, long)]
        watch: bool,
        /// How long to watch (e.g. "10m")
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// Apply a JSON merge patch read from a file
    Patch {
        name: String,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Delete a TrainingJob
    Delete { name: String },
    /// Wait until a TrainingJob reaches one of the given conditions
    Wait {
        name: String,
        /// Condition to wait for; repeatable. Defaults to Succeeded and Failed
        #[arg(long = "condition")]
        conditions: Vec<JobConditionType>,
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
        /// Polling interval (e.g. "30s")
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },
    /// Print the state of a TrainingJob
    Status {
        name: String,
        /// Exit 0 only if the job is running
        #[arg(long, conflicts_with = "succeeded")]
        running: bool,
        /// Exit 0 only if the job succeeded
        #[arg(long)]
        succeeded: bool,
    },
    /// List the pods of a TrainingJob
    Pods {
        name: String,
        /// Only the master pod
        #[arg(long)]
        master: bool,
        #[arg(long)]
        replica_type: Option<String>,
        #[arg(long)]
        replica_index: Option<i32>,
    },
    /// Print pod logs; the master pod's unless told otherwise
    Logs {
        name: String,
        /// Every pod of the job
        #[arg(long)]
        all: bool,
        #[arg(long)]
        replica_type: Option<String>,
        #[arg(long)]
        replica_index: Option<i32>,
        #[arg(short, long)]
        follow: bool,
        #[arg(short, long)]
        container: Option<String>,
    },
    /// List the API group versions served by the cluster
    Discovery {
        #[arg(long)]
        group: Option<String>,
    },
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = config::parse_config()?;
    let client = JobClient::connect(args.kubeconfig.as_deref(), args.context.as_deref()).await?;
    let flag_ns = args.namespace.as_deref();
    let namespace = resolve_namespace(
        flag_ns,
        None,
        config.namespace.as_deref(),
        client.default_namespace(),
    );

    match args.command {
        Commands::Create { file } => job::handle_create(&client, &config, flag_ns, &file).await?,
        Commands::Get {
            name,
            output,
            watch,
            timeout,
        } => {
            let timeout = timeout.map_or_else(|| config.timeout(), Ok)?;
            job::handle_get(&client, &namespace, name.as_deref(), output, watch, timeout).await?
        }
        Commands::Patch { name, file } => job::handle_patch(&client, &namespace, &name, &file).await?,
        Commands::Delete { name } => job::handle_delete(&client, &namespace, &name).await?,
        Commands::Wait {
            name,
            conditions,
            timeout,
            interval,
        } => {
            let timeout = timeout.map_or_else(|| config.timeout(), Ok)?;
            let interval = interval.map_or_else(|| config.interval(), Ok)?;
            job::handle_wait(&client, &namespace, &name, &conditions, timeout, interval).await?
        }
        Commands::Status {
            name,
            running,
            succeeded,
        } => return job::handle_status(&client, &namespace, &name, running, succeeded).await,
        Commands::Pods {
            name,
            master,
            replica_type,
            replica_index,
        } => {
            let selector = PodSelector {
                master,
                replica_type,
                replica_index,
            };
            pods::handle_pods(&client, &namespace, &name, &selector).await?
        }
        Commands::Logs {
            name,
            all,
            replica_type,
            replica_index,
            follow,
            container,
        } => {
            let selector = pods::log_selector(all, replica_type, replica_index);
            let container = container.or(config.container.clone());
            pods::handle_logs(&client, &namespace, &name, &selector, container.as_deref(), follow)
                .await?
        }
        Commands::Discovery { group } => discovery::handle_discovery(&client, group.as_deref()).await?,
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
