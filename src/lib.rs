use lambda_runtime::{Context, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cache::ExistenceCache;
use crate::clients::DynDeviceRegistry;
use crate::config::{Config, TriggerType};
use crate::error::ForwarderError;
use crate::mapping::FieldMapper;
use crate::mnubo::{DynSmartObjectsApi, MnuboClient};

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod mapping;
pub mod mnubo;
pub mod model;
pub mod process;
pub mod schema;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}

pub fn set_up_mnubo_client(config: &Config) -> Result<DynSmartObjectsApi, ForwarderError> {
    info!(
        "Connecting to mnubo {} environment at {}",
        config.environment, config.endpoint
    );
    let client = Arc::new(MnuboClient::from_config(config)?);
    Ok(client)
}

/// Everything an invocation needs, built once per process and shared by all
/// invocations.
pub struct AppContext {
    pub config: Config,
    pub mapper: FieldMapper,
    pub cache: Option<ExistenceCache>,
    pub platform: DynSmartObjectsApi,
    pub registry: DynDeviceRegistry,
}

impl AppContext {
    pub fn new(
        config: Config,
        platform: DynSmartObjectsApi,
        registry: DynDeviceRegistry,
    ) -> Result<Self, ForwarderError> {
        let cache = if config.use_object_cache {
            info!(
                "Object cache enabled ({} entries, {}s validity)",
                config.cache_max_entries, config.cache_validity_period
            );
            Some(ExistenceCache::new(
                config.cache_max_entries,
                config.cache_validity_period,
            )?)
        } else {
            info!("Object cache disabled");
            None
        };

        Ok(AppContext {
            mapper: FieldMapper::from_config(&config),
            config,
            cache,
            platform,
            registry,
        })
    }
}

// lambda handler
pub async fn function_handler(ctx: &AppContext, evt: LambdaEvent<Value>) -> Result<bool, Error> {
    match ctx.config.trigger_type {
        TriggerType::Event => handle_event(ctx, evt).await,
        TriggerType::IotEvent => handle_iot_event(ctx, evt).await,
        TriggerType::ShadowUpdate => handle_shadow_update(ctx, evt).await,
    }
}

/// Forwards a generic event; the object is registered from the event itself.
pub async fn handle_event(ctx: &AppContext, evt: LambdaEvent<Value>) -> Result<bool, Error> {
    invoke(ctx, evt, TriggerType::Event).await
}

/// Forwards an IoT rule payload from a custom MQTT topic.
pub async fn handle_iot_event(ctx: &AppContext, evt: LambdaEvent<Value>) -> Result<bool, Error> {
    invoke(ctx, evt, TriggerType::IotEvent).await
}

/// Forwards the reported state of a device shadow update.
pub async fn handle_shadow_update(
    ctx: &AppContext,
    evt: LambdaEvent<Value>,
) -> Result<bool, Error> {
    invoke(ctx, evt, TriggerType::ShadowUpdate).await
}

async fn invoke(
    ctx: &AppContext,
    evt: LambdaEvent<Value>,
    trigger: TriggerType,
) -> Result<bool, Error> {
    info!("Handling lambda invocation ({})", trigger);
    debug!("Handling event payload: {:?}", evt.payload);

    let result = process::forward(ctx, &evt.payload, trigger).await;
    info!("Remaining time in ms: {}", remaining_time_ms(&evt.context));

    Ok(result?)
}

fn remaining_time_ms(context: &Context) -> u64 {
    let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
    context.deadline.saturating_sub(now)
}
