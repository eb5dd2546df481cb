use kube::CustomResourceExt;
use training_core::TrainingJob;

/// Prints the TrainingJob CRD manifest, or writes it to the path given as the
/// first argument.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let yaml = serde_yaml::to_string(&TrainingJob::crd())?;
    match std::env::args_os().nth(1) {
        Some(path) => std::fs::write(path, yaml)?,
        None => print!("{yaml}"),
    }
    Ok(())
}
