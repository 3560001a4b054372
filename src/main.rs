use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use mnubo_aws_forwarder::clients::{AwsClients, DynDeviceRegistry, IotRegistry};
use mnubo_aws_forwarder::config;
use mnubo_aws_forwarder::AppContext;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    mnubo_aws_forwarder::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::v2023_11_09()).await;
    let clients = AwsClients::new(&aws_config);
    let mut config = config::Config::load_from_env()?;

    // if the client secret provided is an ARN, get it from Secrets Manager
    if let Some(secret_id) = config
        .client_secret
        .clone()
        .filter(|secret| secret.starts_with("arn:aws:secretsmanager:"))
    {
        config.client_secret =
            Some(config::get_client_secret_from_secrets_manager(&aws_config, secret_id).await?);
    }

    let platform = mnubo_aws_forwarder::set_up_mnubo_client(&config)?;
    let registry: DynDeviceRegistry = Arc::new(IotRegistry::new(clients.iot.clone()));
    let ctx = AppContext::new(config, platform, registry)?;

    info!("Serving {} trigger", ctx.config.trigger_type);
    run(service_fn(|request: LambdaEvent<Value>| {
        mnubo_aws_forwarder::function_handler(&ctx, request)
    }))
    .await
}
