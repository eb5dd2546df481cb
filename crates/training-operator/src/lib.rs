//! Kubernetes operator for `TrainingJob` resources: creates one pod and one
//! headless service per replica, tracks the job through its lifecycle and
//! cleans up according to the job's run policy.

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod plan;
pub mod resources;
pub mod status;
pub mod telemetry;

pub use config::{LogFormat, OperatorConfig};
pub use error::{Error, Result};
