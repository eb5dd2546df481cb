use clap::Parser;
use kube::Client;
use training_operator::{OperatorConfig, controller, discovery, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::parse();
    telemetry::init(config.log_format);

    let client = Client::try_default().await?;

    if !config.skip_crd_install {
        discovery::install_crd(client.clone(), &config.field_manager).await?;
    }
    let served_version = discovery::served_version(&client).await?;

    controller::run(client, config, served_version).await;
    Ok(())
}
