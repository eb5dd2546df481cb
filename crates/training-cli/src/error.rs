use thiserror::Error;
use training_core::JobConditionType;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error(
        "timeout waiting for TrainingJob {name} in namespace {namespace} to enter one of the conditions {}",
        format_conditions(.conditions)
    )]
    Timeout {
        name: String,
        namespace: String,
        conditions: Vec<JobConditionType>,
    },

    #[error("no pods found for TrainingJob {name} in namespace {namespace}")]
    NoPods { name: String, namespace: String },

    #[error("watch failed: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("log stream failed: {0}")]
    Io(#[from] std::io::Error),
}

fn format_conditions(conditions: &[JobConditionType]) -> String {
    let names: Vec<&str> = conditions.iter().map(|c| c.as_str()).collect();
    format!("[{}]", names.join(", "))
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_names_job_namespace_and_conditions() {
        let err = ClientError::Timeout {
            name: "mnist".to_string(),
            namespace: "ml".to_string(),
            conditions: vec![JobConditionType::Succeeded, JobConditionType::Failed],
        };
        assert_eq!(
            err.to_string(),
            "timeout waiting for TrainingJob mnist in namespace ml to enter one of the conditions [Succeeded, Failed]"
        );
    }
}
