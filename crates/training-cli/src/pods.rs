use training_core::labels::PodSelector;

use crate::client::JobClient;

type HandlerResult = Result<(), Box<dyn std::error::Error>>;

/// Pods to read logs from: only the master pod unless `all` or a replica
/// filter is given.
pub fn log_selector(all: bool, replica_type: Option<String>, replica_index: Option<i32>) -> PodSelector {
    if !all && replica_type.is_none() && replica_index.is_none() {
        return PodSelector::master();
    }
    PodSelector {
        master: false,
        replica_type,
        replica_index,
    }
}

pub async fn handle_pods(
    client: &JobClient,
    namespace: &str,
    name: &str,
    selector: &PodSelector,
) -> HandlerResult {
    for pod in client.get_pod_names(name, namespace, selector).await? {
        println!("{pod}");
    }
    Ok(())
}

pub async fn handle_logs(
    client: &JobClient,
    namespace: &str,
    name: &str,
    selector: &PodSelector,
    container: Option<&str>,
    follow: bool,
) -> HandlerResult {
    if follow {
        client
            .follow_logs(name, namespace, selector, container, |pod, line| {
                println!("[Pod {pod}]: {line}");
            })
            .await?;
        return Ok(());
    }

    for (pod, logs) in client.get_logs(name, namespace, selector, container).await? {
        println!("The logs of Pod {pod}:");
        println!("{logs}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_default_to_master() {
        assert_eq!(log_selector(false, None, None), PodSelector::master());
    }

    #[test]
    fn filters_or_all_widen_selection() {
        assert!(!log_selector(true, None, None).master);

        let workers = log_selector(false, Some("Worker".to_string()), Some(1));
        assert!(!workers.master);
        assert_eq!(workers.replica_type.as_deref(), Some("Worker"));
        assert_eq!(workers.replica_index, Some(1));
    }
}
