use fancy_regex::Regex;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::model::{Event, SmartObject};

static RESERVED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^x_\w+").expect("Failed to create regex"));

/// Whether `key` is in the platform-reserved `x_` namespace.
pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEY.is_match(key).unwrap_or(false)
}

pub fn build_event(event: &Event) -> Map<String, Value> {
    let mut output = Map::new();

    if let Some(device_id) = &event.device_id {
        let object = build_object(&SmartObject::with_device_id(device_id.as_str()));
        output.insert("x_object".to_string(), Value::Object(object));
    }
    if let Some(event_id) = &event.event_id {
        output.insert("event_id".to_string(), json!(event_id));
    }
    insert_some(&mut output, "x_event_type", &event.event_type);
    insert_some(&mut output, "x_timestamp", &event.timestamp);
    insert_some(&mut output, "x_latitude", &event.latitude);
    insert_some(&mut output, "x_longitude", &event.longitude);

    copy_custom(&mut output, &event.custom_data);
    output
}

pub fn build_object(object: &SmartObject) -> Map<String, Value> {
    let mut output = Map::new();

    insert_some(&mut output, "x_device_id", &object.device_id);
    insert_some(&mut output, "x_object_type", &object.object_type);
    if let Some(username) = &object.owner_username {
        output.insert("x_owner".to_string(), json!({ "username": username }));
    }
    insert_some(&mut output, "x_timestamp", &object.timestamp);
    insert_some(&mut output, "x_registration_date", &object.registration_date);
    insert_some(&mut output, "x_last_update_timestamp", &object.last_update_timestamp);
    insert_some(&mut output, "x_registration_latitude", &object.registration_latitude);
    insert_some(&mut output, "x_registration_longitude", &object.registration_longitude);

    copy_custom(&mut output, &object.custom_attributes);
    output
}

fn insert_some<T: serde::Serialize>(output: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(value) = value {
        output.insert(key.to_string(), json!(value));
    }
}

fn copy_custom(output: &mut Map<String, Value>, custom: &Map<String, Value>) {
    for (key, value) in custom {
        if is_reserved(key) {
            debug!("dropping custom field {} colliding with reserved prefix", key);
            continue;
        }
        if output.contains_key(key) {
            debug!("dropping custom field {} colliding with an emitted field", key);
            continue;
        }
        output.insert(key.clone(), value.clone());
    }
}
