use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Core(#[from] training_core::Error),

    #[error("missing namespace on TrainingJob")]
    MissingNamespace,

    #[error("API group version {0} is not served by the cluster")]
    GroupNotServed(String),

    #[error("CRD {0} was not established in time")]
    CrdNotEstablished(String),

    #[error("waiting for CRD failed: {0}")]
    Wait(#[from] kube::runtime::wait::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
