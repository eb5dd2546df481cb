use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use kube::ResourceExt;
use training_core::{JobConditionType, TrainingJob};

use crate::client::{DEFAULT_CONDITIONS, JobClient, resolve_namespace};
use crate::config::Config;
use crate::output::{jobs_table, print_json};
use crate::spinner::create_spinner;

type HandlerResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Read a TrainingJob manifest; JSON is accepted as YAML.
pub fn read_manifest(path: &Path) -> HandlerResult<TrainingJob> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let job: TrainingJob = serde_yaml::from_str(&content)
        .map_err(|e| format!("invalid TrainingJob manifest {}: {}", path.display(), e))?;
    job.spec.validate()?;
    Ok(job)
}

pub fn read_patch(path: &Path) -> HandlerResult<serde_json::Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    Ok(serde_yaml::from_str(&content)?)
}

pub async fn handle_create(
    client: &JobClient,
    config: &Config,
    namespace: Option<&str>,
    file: &Path,
) -> HandlerResult {
    let job = read_manifest(file)?;
    let namespace = resolve_namespace(
        namespace,
        job.metadata.namespace.as_deref(),
        config.namespace.as_deref(),
        client.default_namespace(),
    );

    let spinner = create_spinner();
    spinner.set_message(format!("Creating TrainingJob {} in {}...", job.name_any(), namespace));
    match client.create(&job, &namespace).await {
        Ok(created) => {
            spinner.finish_with_message(format!("TrainingJob {} created", created.name_any()));
            Ok(())
        }
        Err(e) => {
            spinner.finish_and_clear();
            Err(e.into())
        }
    }
}

pub async fn handle_get(
    client: &JobClient,
    namespace: &str,
    name: Option<&str>,
    output: OutputFormat,
    watch: bool,
    timeout: Duration,
) -> HandlerResult {
    if watch {
        client
            .watch(name, namespace, timeout, |job| match output {
                OutputFormat::Json => {
                    if let Err(e) = print_json(job) {
                        tracing::warn!(error = %e, "failed to render job");
                    }
                }
                OutputFormat::Table => {
                    println!("{}", jobs_table(std::slice::from_ref(job), Utc::now()));
                }
            })
            .await?;
        return Ok(());
    }

    let jobs = match name {
        Some(name) => vec![client.get(name, namespace).await?],
        None => client.list(namespace).await?,
    };
    match output {
        OutputFormat::Json if name.is_some() => print_json(&jobs[0])?,
        OutputFormat::Json => print_json(&jobs)?,
        OutputFormat::Table if jobs.is_empty() => println!("No TrainingJobs found in {namespace}."),
        OutputFormat::Table => println!("{}", jobs_table(&jobs, Utc::now())),
    }
    Ok(())
}

pub async fn handle_patch(client: &JobClient, namespace: &str, name: &str, file: &Path) -> HandlerResult {
    let patch = read_patch(file)?;
    let job = client.patch(name, &patch, namespace).await?;
    println!("TrainingJob {} patched", job.name_any());
    Ok(())
}

pub async fn handle_delete(client: &JobClient, namespace: &str, name: &str) -> HandlerResult {
    let spinner = create_spinner();
    spinner.set_message(format!("Deleting TrainingJob {name}..."));
    match client.delete(name, namespace).await {
        Ok(()) => {
            spinner.finish_with_message(format!("TrainingJob {name} deleted"));
            Ok(())
        }
        Err(e) => {
            spinner.finish_and_clear();
            Err(e.into())
        }
    }
}

pub async fn handle_wait(
    client: &JobClient,
    namespace: &str,
    name: &str,
    conditions: &[JobConditionType],
    timeout: Duration,
    interval: Duration,
) -> HandlerResult {
    let expected = if conditions.is_empty() {
        &DEFAULT_CONDITIONS[..]
    } else {
        conditions
    };

    let spinner = create_spinner();
    spinner.set_message(format!("Waiting for TrainingJob {name}..."));
    let result = client
        .wait_for_condition(name, namespace, expected, timeout, interval, |job| {
            let state = match job.state() {
                "" => "Pending",
                state => state,
            };
            spinner.set_message(format!("Waiting for TrainingJob {name} (state: {state})..."));
        })
        .await;

    match result {
        Ok(job) => {
            spinner.finish_with_message(format!("TrainingJob {name} is {}", job.state()));
            Ok(())
        }
        Err(e) => {
            spinner.finish_and_clear();
            Err(e.into())
        }
    }
}

/// Print the job's state. With a check flag the exit code reports the check
/// instead.
pub async fn handle_status(
    client: &JobClient,
    namespace: &str,
    name: &str,
    running: bool,
    succeeded: bool,
) -> HandlerResult<ExitCode> {
    let passed = if running {
        client.is_job_running(name, namespace).await?
    } else if succeeded {
        client.is_job_succeeded(name, namespace).await?
    } else {
        println!("{}", client.get_job_status(name, namespace).await?);
        return Ok(ExitCode::SUCCESS);
    };
    Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
