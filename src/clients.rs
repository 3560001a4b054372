use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_iot::error::DisplayErrorContext;
use aws_sdk_iot::Client as IotClient;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::ForwarderError;

/// A type used to hold the AWS clients required to interact with AWS services
/// used by the lambda function.
#[derive(Clone)]
pub struct AwsClients {
    pub iot: IotClient,
}

impl AwsClients {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        AwsClients {
            iot: IotClient::new(sdk_config),
        }
    }
}

pub type DynDeviceRegistry = Arc<dyn DeviceRegistry + Send + Sync>;

/// Source of device metadata used to register smart objects.
#[async_trait]
pub trait DeviceRegistry {
    /// Returns `thingName`, `thingTypeName` and an `attributes` mapping for
    /// the device, without any transport envelope.
    async fn describe_device(&self, device_id: &str) -> Result<Map<String, Value>, ForwarderError>;
}

pub struct IotRegistry {
    client: IotClient,
}

impl IotRegistry {
    pub fn new(client: IotClient) -> Self {
        IotRegistry { client }
    }
}

#[async_trait]
impl DeviceRegistry for IotRegistry {
    async fn describe_device(&self, device_id: &str) -> Result<Map<String, Value>, ForwarderError> {
        let response = self
            .client
            .describe_thing()
            .thing_name(device_id)
            .send()
            .await
            .map_err(|e| ForwarderError::Registry {
                device_id: device_id.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        debug!("describe_thing response for {}: {:?}", device_id, response);

        // version, default client id and request metadata are left behind
        let mut thing = Map::new();
        if let Some(name) = response.thing_name() {
            thing.insert("thingName".to_string(), json!(name));
        }
        if let Some(type_name) = response.thing_type_name() {
            thing.insert("thingTypeName".to_string(), json!(type_name));
        }
        let attributes = response
            .attributes()
            .map(|attributes| {
                attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect::<Map<String, Value>>()
            })
            .unwrap_or_default();
        thing.insert("attributes".to_string(), Value::Object(attributes));

        Ok(thing)
    }
}
