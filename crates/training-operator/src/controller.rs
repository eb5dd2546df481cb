use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    Client, Resource, ResourceExt,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::ApiResource,
    runtime::{
        Controller,
        controller::Action,
        watcher::Config as WatcherConfig,
    },
};
use serde_json::json;
use training_core::labels::{GROUP_NAME_LABEL, job_labels, to_selector};
use training_core::{
    GROUP, GroupVersionForDiscovery, JobCondition, JobConditionType, TrainingJob,
    TrainingJobStatus, condition::set_condition,
};
use training_scheduler::{GangScheduler, PodGroup, compile_pod_group};

#[cfg(test)]
use mockall::automock;

use crate::config::OperatorConfig;
use crate::error::{Error, Result};
use crate::plan::{plan_children, plan_cleanup};
use crate::resources::{build_pod, build_service};
use crate::status::{ObservedPod, deadline_remaining, next_status, ttl_remaining};

const WATCH_TIMEOUT_SECS: u32 = 25;

/// Kubernetes operations the reconciler performs on a job's namespace.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn list_pods(&self, ns: &str, selector: &str) -> Result<Vec<Pod>>;

    async fn list_service_names(&self, ns: &str, selector: &str) -> Result<BTreeSet<String>>;

    /// Create a pod. One that already exists counts as created.
    async fn create_pod(&self, ns: &str, pod: &Pod) -> Result<()>;

    /// Create a service. One that already exists counts as created.
    async fn create_service(&self, ns: &str, service: &Service) -> Result<()>;

    /// Delete a pod. One that is already gone counts as deleted.
    async fn delete_pod(&self, ns: &str, name: &str) -> Result<()>;

    /// Delete a service. One that is already gone counts as deleted.
    async fn delete_service(&self, ns: &str, name: &str) -> Result<()>;

    /// Server-side apply the job's `PodGroup`.
    async fn apply_pod_group(&self, ns: &str, group: &PodGroup) -> Result<()>;

    async fn delete_pod_group(&self, ns: &str, name: &str) -> Result<()>;

    /// Merge-patch the job's status subresource.
    async fn patch_status(&self, ns: &str, name: &str, status: &TrainingJobStatus) -> Result<()>;

    async fn delete_job(&self, ns: &str, name: &str) -> Result<()>;
}

/// [`KubeClient`] backed by the API server.
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
    /// `PodGroup` API of the configured gang scheduler.
    pod_groups: Option<ApiResource>,
}

impl KubeClientImpl {
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        Self {
            client,
            field_manager: config.field_manager.clone(),
            pod_groups: config.gang_scheduler.pod_group_resource(),
        }
    }

    fn api<K>(&self, ns: &str) -> Api<K>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns)
    }

    fn pod_group_api(&self, ns: &str) -> Option<Api<DynamicObject>> {
        let resource = self.pod_groups.as_ref()?;
        Some(Api::namespaced_with(self.client.clone(), ns, resource))
    }
}

/// Treat "already exists" as success.
fn ignore_conflict<T>(result: kube::Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Treat "not found" as success.
fn ignore_not_found<T>(result: kube::Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn list_pods(&self, ns: &str, selector: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(selector);
        Ok(self.api::<Pod>(ns).list(&params).await?.items)
    }

    async fn list_service_names(&self, ns: &str, selector: &str) -> Result<BTreeSet<String>> {
        let params = ListParams::default().labels(selector);
        let services = self.api::<Service>(ns).list(&params).await?;
        Ok(services.items.iter().map(|s| s.name_any()).collect())
    }

    async fn create_pod(&self, ns: &str, pod: &Pod) -> Result<()> {
        ignore_conflict(self.api::<Pod>(ns).create(&PostParams::default(), pod).await)
    }

    async fn create_service(&self, ns: &str, service: &Service) -> Result<()> {
        ignore_conflict(self.api::<Service>(ns).create(&PostParams::default(), service).await)
    }

    async fn delete_pod(&self, ns: &str, name: &str) -> Result<()> {
        ignore_not_found(self.api::<Pod>(ns).delete(name, &DeleteParams::background()).await)
    }

    async fn delete_service(&self, ns: &str, name: &str) -> Result<()> {
        ignore_not_found(self.api::<Service>(ns).delete(name, &DeleteParams::background()).await)
    }

    async fn apply_pod_group(&self, ns: &str, group: &PodGroup) -> Result<()> {
        let Some(api) = self.pod_group_api(ns) else {
            return Ok(());
        };
        api.patch(
            &group.metadata.name,
            &PatchParams::apply(&self.field_manager).force(),
            &Patch::Apply(group),
        )
        .await?;
        Ok(())
    }

    async fn delete_pod_group(&self, ns: &str, name: &str) -> Result<()> {
        let Some(api) = self.pod_group_api(ns) else {
            return Ok(());
        };
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn patch_status(&self, ns: &str, name: &str, status: &TrainingJobStatus) -> Result<()> {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api::<TrainingJob>(ns)
            .patch_status(name, &params, &Patch::Merge(json!({ "status": status })))
            .await?;
        Ok(())
    }

    async fn delete_job(&self, ns: &str, name: &str) -> Result<()> {
        ignore_not_found(self.api::<TrainingJob>(ns).delete(name, &DeleteParams::background()).await)
    }
}

pub struct Context {
    pub kube: Arc<dyn KubeClient>,
    pub config: OperatorConfig,
    /// Discovery entry stamped onto every status written.
    pub served_version: GroupVersionForDiscovery,
}

/// Write `status` unless the job already carries it.
async fn report_status(
    ctx: &Context,
    job: &TrainingJob,
    ns: &str,
    mut status: TrainingJobStatus,
) -> Result<()> {
    ctx.served_version.validate()?;
    status.observed_generation = job.metadata.generation;
    status.served_version = Some(ctx.served_version.clone());
    if job.status.as_ref() == Some(&status) {
        return Ok(());
    }
    ctx.kube.patch_status(ns, &job.name_any(), &status).await
}

/// Record a permanent spec error on the job; it is not retried.
async fn reject(ctx: &Context, job: &TrainingJob, ns: &str, err: &training_core::Error) -> Result<Action> {
    tracing::warn!(job = %job.name_any(), error = %err, "rejecting invalid TrainingJob");
    let now = Utc::now();
    let mut status = job.status.clone().unwrap_or_default();
    status.completion_time.get_or_insert_with(|| now.to_rfc3339());
    set_condition(
        &mut status.conditions,
        JobCondition::new(JobConditionType::Failed, "InvalidSpec", err.to_string(), now),
    );
    report_status(ctx, job, ns, status).await?;
    Ok(Action::await_change())
}

pub async fn reconcile(job: Arc<TrainingJob>, ctx: Arc<Context>) -> Result<Action> {
    if job.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    let ns = job.namespace().ok_or(Error::MissingNamespace)?;
    let name = job.name_any();
    let kube = &ctx.kube;

    if !job.is_finished() {
        if let Err(err) = job.spec.validate() {
            return reject(&ctx, &job, &ns, &err).await;
        }
    }

    let selector = to_selector(&job_labels(&name));
    let observed: Vec<ObservedPod> = kube
        .list_pods(&ns, &selector)
        .await?
        .iter()
        .filter_map(ObservedPod::from_pod)
        .collect();
    let service_names = kube.list_service_names(&ns, &selector).await?;

    let now = Utc::now();
    let transition = next_status(&job, &observed, now);
    let policy = &job.spec.run_policy;

    if transition.is_finished() {
        if !job.is_finished() {
            tracing::info!(job = %name, state = ?transition.status.last_condition().map(|c| c.type_), "TrainingJob finished");
        }
        let cleanup = plan_cleanup(
            policy.clean_pod_policy,
            &observed,
            &service_names,
            transition.terminate_active,
        );
        for pod in &cleanup.delete_pods {
            kube.delete_pod(&ns, pod).await?;
        }
        for service in &cleanup.delete_services {
            kube.delete_service(&ns, service).await?;
        }
        if ctx.config.gang_scheduler != GangScheduler::None {
            kube.delete_pod_group(&ns, &name).await?;
        }
        report_status(&ctx, &job, &ns, transition.status.clone()).await?;

        return match ttl_remaining(&transition.status, policy.ttl_seconds_after_finished, now) {
            Some(left) if left.is_zero() => {
                tracing::info!(job = %name, "deleting TrainingJob after its TTL");
                kube.delete_job(&ns, &name).await?;
                Ok(Action::await_change())
            }
            Some(left) => Ok(Action::requeue(left)),
            None => Ok(Action::await_change()),
        };
    }

    if let Some(group) = compile_pod_group(&job, ctx.config.gang_scheduler) {
        kube.apply_pod_group(&ns, &group).await?;
    }

    let plan = plan_children(&name, &job.spec, &observed, &service_names, &transition.restart);
    for (replica_type, index) in &plan.create_services {
        kube.create_service(&ns, &build_service(&job, replica_type, *index)?).await?;
    }
    for (replica_type, index) in &plan.create_pods {
        let pod = build_pod(&job, replica_type, *index, ctx.config.gang_scheduler)?;
        tracing::debug!(job = %name, pod = ?pod.metadata.name, "creating pod");
        kube.create_pod(&ns, &pod).await?;
    }
    if !transition.restart.is_empty() {
        tracing::info!(job = %name, pods = ?transition.restart, "restarting failed replicas");
    }
    for pod in &plan.delete_pods {
        kube.delete_pod(&ns, pod).await?;
    }
    for service in &plan.delete_services {
        kube.delete_service(&ns, service).await?;
    }

    report_status(&ctx, &job, &ns, transition.status.clone()).await?;

    let requeue = deadline_remaining(&transition.status, policy.active_deadline_seconds, now)
        .map_or(ctx.config.requeue_interval, |left| {
            left.min(ctx.config.requeue_interval).max(Duration::from_secs(1))
        });
    Ok(Action::requeue(requeue))
}

pub fn error_policy(job: Arc<TrainingJob>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::error!(job = %job.name_any(), error = %error, "reconcile failed");
    Action::requeue(ctx.config.error_requeue)
}

/// Run the TrainingJob controller until a shutdown signal arrives.
pub async fn run(client: Client, config: OperatorConfig, served_version: GroupVersionForDiscovery) {
    let jobs: Api<TrainingJob> = match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let (pods, services): (Api<Pod>, Api<Service>) = match &config.namespace {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let watch = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let children = watch.clone().labels(&format!("{GROUP_NAME_LABEL}={GROUP}"));

    tracing::info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        gang_scheduler = %config.gang_scheduler,
        "starting TrainingJob controller"
    );

    let ctx = Arc::new(Context {
        kube: Arc::new(KubeClientImpl::new(client, &config)),
        config,
        served_version,
    });

    Controller::new(jobs, watch)
        .owns(pods, children.clone())
        .owns(services, children)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((job, action)) => tracing::debug!(job = %job.name, ?action, "reconciled"),
                Err(err) => tracing::warn!(error = %err, "reconcile stream error"),
            }
        })
        .await;

    tracing::info!("controller stopped");
}
