use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TriggerType;
use crate::error::ForwarderError;
use crate::schema;
use crate::AppContext;

/// Where the attributes of a not-yet-registered smart object come from.
#[derive(Debug, Clone, Copy)]
pub enum ObjectSource<'a> {
    /// The event record itself carries the object attributes.
    Record(&'a Value),
    /// The device registry is asked for the device description.
    Registry,
}

/// Makes sure a smart object exists for `device_id`, registering it when the
/// platform does not know it yet. `raw_event` is only used for diagnostics.
pub async fn ensure_object_exists(
    ctx: &AppContext,
    device_id: Option<&str>,
    source: ObjectSource<'_>,
    raw_event: &Value,
) -> Result<(), ForwarderError> {
    let Some(device_id) = device_id else {
        return Err(ForwarderError::missing(vec!["device_id"], raw_event));
    };

    let exists = match &ctx.cache {
        Some(cache) => {
            cache
                .exists(device_id, Instant::now(), || {
                    ctx.platform.object_exists(device_id)
                })
                .await?
        }
        None => ctx.platform.object_exists(device_id).await?,
    };
    if exists {
        debug!("smart object {} exists", device_id);
        return Ok(());
    }

    info!("smart object {} not found, registering it", device_id);
    let mut object = match source {
        ObjectSource::Record(record) => {
            let mut object = ctx.mapper.map_to_object(record.clone())?;
            // leftover keys of an event record are event data, not object attributes
            object.custom_attributes.clear();
            object
        }
        ObjectSource::Registry => {
            let thing = ctx.registry.describe_device(device_id).await?;
            ctx.mapper.map_thing_to_object(Value::Object(thing))?
        }
    };

    let missing = object.missing_required_fields();
    if !missing.is_empty() {
        return Err(ForwarderError::missing(missing, raw_event));
    }

    if let Some(owner) = object.owner_username.as_deref() {
        if !ctx.platform.owner_exists(owner).await? {
            warn!(
                "owner {} does not exist, registering {} without an owner",
                owner, device_id
            );
            object.owner_username = None;
        }
    }

    let payload = schema::build_object(&object);
    debug!("creating smart object: {:?}", payload);
    match ctx.platform.create_object(payload).await {
        Ok(()) => Ok(()),
        Err(ForwarderError::AlreadyExists(_)) => {
            info!(
                "smart object {} was registered concurrently, continuing",
                device_id
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Maps `raw_event` according to the trigger shape, registers its object if
/// needed and sends it. Returns whether the platform reported a result.
pub async fn forward(
    ctx: &AppContext,
    raw_event: &Value,
    trigger: TriggerType,
) -> Result<bool, ForwarderError> {
    let result = try_forward(ctx, raw_event, trigger).await;
    if let Err(error) = &result {
        error!(%error, input = %raw_event, "failed to forward event");
    }
    result
}

async fn try_forward(
    ctx: &AppContext,
    raw_event: &Value,
    trigger: TriggerType,
) -> Result<bool, ForwarderError> {
    // mapping consumes its input; raw_event stays intact for diagnostics
    let input = raw_event.clone();
    let (event, source) = match trigger {
        TriggerType::Event => (
            ctx.mapper.map_to_event(input)?,
            ObjectSource::Record(raw_event),
        ),
        TriggerType::IotEvent => (
            ctx.mapper
                .map_iot_event(input, &ctx.config.iot_mqtt_default_event_type)?,
            ObjectSource::Registry,
        ),
        TriggerType::ShadowUpdate => (
            ctx.mapper
                .map_shadow_update(input, &ctx.config.shadow_update_default_event_type)?,
            ObjectSource::Registry,
        ),
    };

    // without a device id nothing can be registered; report every missing field at once
    if event.device_id.is_none() {
        return Err(ForwarderError::missing(
            event.missing_required_fields(),
            raw_event,
        ));
    }

    ensure_object_exists(ctx, event.device_id.as_deref(), source, raw_event).await?;

    let missing = event.missing_required_fields();
    if !missing.is_empty() {
        return Err(ForwarderError::missing(missing, raw_event));
    }

    let payload = schema::build_event(&event);
    debug!("sending event: {:?}", payload);
    let results = ctx.platform.send_events(vec![payload]).await?;
    Ok(results.is_some())
}
