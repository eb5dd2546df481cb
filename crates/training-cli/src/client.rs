//! Thin client over the Kubernetes API for TrainingJobs and their pods.

use std::path::Path;
use std::time::Duration;

use futures::{AsyncBufReadExt, StreamExt, TryStreamExt, stream};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Client, Config, ResourceExt,
    api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    runtime::{WatchStreamExt, watcher},
};
use training_core::labels::{PodSelector, to_selector};
use training_core::{ApiGroupList, GroupVersionForDiscovery, JobConditionType, TrainingJob};

use crate::error::{ClientError, Result};

pub const DEFAULT_CONDITIONS: [JobConditionType; 2] =
    [JobConditionType::Succeeded, JobConditionType::Failed];

pub struct JobClient {
    client: Client,
    default_namespace: String,
}

/// First of: the explicit flag, the manifest, the config file, the client's
/// default namespace.
pub fn resolve_namespace(
    flag: Option<&str>,
    manifest: Option<&str>,
    config: Option<&str>,
    client_default: &str,
) -> String {
    flag.or(manifest)
        .or(config)
        .unwrap_or(client_default)
        .to_string()
}

/// Number of polls made by [`JobClient::wait_for_condition`]; at least one.
pub fn poll_rounds(timeout: Duration, interval: Duration) -> u64 {
    if interval.is_zero() {
        return 1;
    }
    let rounds = (timeout.as_secs_f64() / interval.as_secs_f64()).round() as u64;
    rounds.max(1)
}

/// Whether `job` carries any of `expected`, regardless of its status.
pub fn has_any_condition(job: &TrainingJob, expected: &[JobConditionType]) -> bool {
    job.status
        .as_ref()
        .is_some_and(|s| s.conditions.iter().any(|c| expected.contains(&c.type_)))
}

impl JobClient {
    /// Connect using `kubeconfig` and `context` when given, otherwise the
    /// usual in-cluster or `~/.kube/config` inference.
    pub async fn connect(
        kubeconfig: Option<&Path>,
        context: Option<&str>,
    ) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };
        let config = match kubeconfig {
            Some(path) => {
                Config::from_custom_kubeconfig(Kubeconfig::read_from(path)?, &options).await?
            }
            None if context.is_some() => Config::from_kubeconfig(&options).await?,
            None => Config::infer().await?,
        };
        let default_namespace = config.default_namespace.clone();
        Ok(Self {
            client: Client::try_from(config)?,
            default_namespace,
        })
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    fn jobs(&self, namespace: &str) -> Api<TrainingJob> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub async fn create(&self, job: &TrainingJob, namespace: &str) -> Result<TrainingJob> {
        Ok(self.jobs(namespace).create(&PostParams::default(), job).await?)
    }

    pub async fn get(&self, name: &str, namespace: &str) -> Result<TrainingJob> {
        Ok(self.jobs(namespace).get(name).await?)
    }

    pub async fn list(&self, namespace: &str) -> Result<Vec<TrainingJob>> {
        Ok(self.jobs(namespace).list(&ListParams::default()).await?.items)
    }

    /// Call `on_change` for every change to the named job, or to any job in
    /// the namespace, until a watched job finishes or `timeout` passes.
    pub async fn watch(
        &self,
        name: Option<&str>,
        namespace: &str,
        timeout: Duration,
        mut on_change: impl FnMut(&TrainingJob),
    ) -> Result<()> {
        let mut config = watcher::Config::default();
        if let Some(name) = name {
            config = config.fields(&format!("metadata.name={name}"));
        }
        let changes = watcher(self.jobs(namespace), config).applied_objects();
        let watching = async {
            let mut changes = std::pin::pin!(changes);
            while let Some(job) = changes.try_next().await? {
                on_change(&job);
                if name.is_some() && job.is_finished() {
                    break;
                }
            }
            Ok::<_, ClientError>(())
        };
        match tokio::time::timeout(timeout, watching).await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }

    /// Apply a JSON merge patch to the job.
    pub async fn patch(
        &self,
        name: &str,
        patch: &serde_json::Value,
        namespace: &str,
    ) -> Result<TrainingJob> {
        Ok(self
            .jobs(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    pub async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        self.jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    /// Poll the job every `interval` until it carries one of `expected`.
    ///
    /// `on_poll` sees the job after every poll.
    pub async fn wait_for_condition(
        &self,
        name: &str,
        namespace: &str,
        expected: &[JobConditionType],
        timeout: Duration,
        interval: Duration,
        mut on_poll: impl FnMut(&TrainingJob),
    ) -> Result<TrainingJob> {
        for _ in 0..poll_rounds(timeout, interval) {
            let job = self.get(name, namespace).await?;
            on_poll(&job);
            if has_any_condition(&job, expected) {
                return Ok(job);
            }
            tokio::time::sleep(interval).await;
        }
        Err(ClientError::Timeout {
            name: name.to_string(),
            namespace: namespace.to_string(),
            conditions: expected.to_vec(),
        })
    }

    /// Type of the job's latest condition, `""` before any is recorded.
    pub async fn get_job_status(&self, name: &str, namespace: &str) -> Result<String> {
        Ok(self.get(name, namespace).await?.state().to_string())
    }

    pub async fn is_job_running(&self, name: &str, namespace: &str) -> Result<bool> {
        let state = self.get_job_status(name, namespace).await?;
        Ok(state.eq_ignore_ascii_case(JobConditionType::Running.as_str()))
    }

    pub async fn is_job_succeeded(&self, name: &str, namespace: &str) -> Result<bool> {
        let state = self.get_job_status(name, namespace).await?;
        Ok(state.eq_ignore_ascii_case(JobConditionType::Succeeded.as_str()))
    }

    /// Names of the job's pods matching `selector`, sorted. Logs a warning
    /// when there are none.
    pub async fn get_pod_names(
        &self,
        name: &str,
        namespace: &str,
        selector: &PodSelector,
    ) -> Result<Vec<String>> {
        let labels = selector.labels(name);
        let params = ListParams::default().labels(&to_selector(&labels));
        let mut names: Vec<String> = self
            .pods(namespace)
            .list(&params)
            .await?
            .items
            .iter()
            .map(|p| p.name_any())
            .collect();
        names.sort();
        if names.is_empty() {
            tracing::warn!(job = name, ?labels, "no pods found for TrainingJob");
        }
        Ok(names)
    }

    async fn pod_names_or_err(
        &self,
        name: &str,
        namespace: &str,
        selector: &PodSelector,
    ) -> Result<Vec<String>> {
        let pods = self.get_pod_names(name, namespace, selector).await?;
        if pods.is_empty() {
            return Err(ClientError::NoPods {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        Ok(pods)
    }

    /// Current logs of every selected pod, as `(pod, logs)` pairs.
    pub async fn get_logs(
        &self,
        name: &str,
        namespace: &str,
        selector: &PodSelector,
        container: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let api = self.pods(namespace);
        let params = LogParams {
            container: container.map(str::to_string),
            ..Default::default()
        };
        let mut logs = Vec::new();
        for pod in self.pod_names_or_err(name, namespace, selector).await? {
            let text = api.logs(&pod, &params).await?;
            logs.push((pod, text));
        }
        Ok(logs)
    }

    /// Stream every selected pod's log, interleaved as lines arrive, until all
    /// streams end.
    pub async fn follow_logs(
        &self,
        name: &str,
        namespace: &str,
        selector: &PodSelector,
        container: Option<&str>,
        mut on_line: impl FnMut(&str, &str),
    ) -> Result<()> {
        let api = self.pods(namespace);
        let params = LogParams {
            container: container.map(str::to_string),
            follow: true,
            ..Default::default()
        };

        let mut streams = Vec::new();
        for pod in self.pod_names_or_err(name, namespace, selector).await? {
            let lines = api.log_stream(&pod, &params).await?.lines();
            streams.push(Box::pin(
                lines.map(move |line| line.map(|text| (pod.clone(), text))),
            ));
        }

        let mut merged = stream::select_all(streams);
        while let Some((pod, line)) = merged.try_next().await? {
            on_line(&pod, &line);
        }
        Ok(())
    }

    /// Well-formed group versions served by the cluster, optionally limited
    /// to one group.
    pub async fn discovery(&self, group: Option<&str>) -> Result<Vec<GroupVersionForDiscovery>> {
        let mut groups = ApiGroupList::from(self.client.list_api_groups().await?);
        if let Some(group) = group {
            groups.groups.retain(|g| g.name == group);
        }
        for g in &groups.groups {
            if let Err(err) = g.validate() {
                tracing::warn!(group = %g.name, error = %err, "skipping malformed discovery entries");
            }
        }
        Ok(groups.valid_entries().cloned().collect())
    }
}
