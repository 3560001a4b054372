use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::config::{AttributeRules, Config, FieldNames};
use crate::error::ForwarderError;
use crate::events::ShadowDocument;
use crate::model::{Event, SmartObject};

/// Extracts the recognized source fields of an input document into an [`Event`]
/// or a [`SmartObject`]. Whatever is left over becomes custom data, after the
/// per-kind blacklist and rename rules are applied.
#[derive(Debug, Clone, Default)]
pub struct FieldMapper {
    fields: FieldNames,
    normalize_timestamps: bool,
    event_attributes: AttributeRules,
    object_attributes: AttributeRules,
}

impl FieldMapper {
    pub fn new(fields: FieldNames) -> Self {
        FieldMapper {
            fields,
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        FieldMapper::new(config.fields.clone())
            .with_timestamp_normalization(config.normalize_timestamps)
            .with_event_attributes(config.event_attributes.clone())
            .with_object_attributes(config.object_attributes.clone())
    }

    pub fn with_timestamp_normalization(mut self, enabled: bool) -> Self {
        self.normalize_timestamps = enabled;
        self
    }

    pub fn with_event_attributes(mut self, rules: AttributeRules) -> Self {
        self.event_attributes = rules;
        self
    }

    pub fn with_object_attributes(mut self, rules: AttributeRules) -> Self {
        self.object_attributes = rules;
        self
    }

    pub fn map_to_event(&self, input: Value) -> Result<Event, ForwarderError> {
        let record = into_mapping(input)?;
        Ok(self.extract_event(record))
    }

    pub fn map_to_object(&self, input: Value) -> Result<SmartObject, ForwarderError> {
        let record = into_mapping(input)?;
        Ok(self.extract_object(record))
    }

    /// Maps a flat MQTT payload, falling back to `default_event_type` when the
    /// payload does not carry one.
    pub fn map_iot_event(
        &self,
        input: Value,
        default_event_type: &str,
    ) -> Result<Event, ForwarderError> {
        let mut event = self.map_to_event(input)?;
        if event.event_type.is_none() {
            debug!("no event type in payload, using {}", default_event_type);
            event.event_type = Some(default_event_type.to_string());
        }
        Ok(event)
    }

    /// Maps a shadow update document. Only `state.reported` feeds the event data
    /// and the event type is always `event_type`. A device id in the reported
    /// state takes precedence over the top-level one.
    pub fn map_shadow_update(
        &self,
        input: Value,
        event_type: &str,
    ) -> Result<Event, ForwarderError> {
        let mut document = into_mapping(input)?;
        let top_level_device_id = take_string(&mut document, &self.fields.device_id);
        let shadow: ShadowDocument = serde_json::from_value(Value::Object(document))
            .map_err(|e| ForwarderError::InvalidInput(format!("invalid shadow document: {}", e)))?;
        debug!("shadow document: {:?}", shadow);

        let mut event = self.extract_event(shadow.into_reported());
        if event.device_id.is_none() {
            event.device_id = top_level_device_id;
        }
        event.event_type = Some(event_type.to_string());
        Ok(event)
    }

    /// Maps a device registry description (`thingName`, `thingTypeName` and an
    /// `attributes` sub-mapping) to a smart object.
    pub fn map_thing_to_object(&self, thing: Value) -> Result<SmartObject, ForwarderError> {
        let mut thing = into_mapping(thing)?;
        let device_id = take_string(&mut thing, "thingName");
        let object_type = take_string(&mut thing, "thingTypeName");
        let attributes = match thing.remove("attributes") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(attributes)) => attributes,
            Some(other) => {
                return Err(ForwarderError::InvalidInput(format!(
                    "thing attributes are not a mapping: {}",
                    other
                )))
            }
        };

        let mut object = self.extract_object(attributes);
        if device_id.is_some() {
            object.device_id = device_id;
        }
        if object_type.is_some() {
            object.object_type = object_type;
        }
        Ok(object)
    }

    fn extract_event(&self, mut record: Map<String, Value>) -> Event {
        let fields = &self.fields;
        let device_id = take_string(&mut record, &fields.device_id);
        let event_id = take_string(&mut record, &fields.event_id);
        let event_type = take_string(&mut record, &fields.event_type);
        let timestamp = self.take_timestamp(&mut record, &fields.timestamp);
        let latitude = take_number(&mut record, &fields.latitude);
        let longitude = take_number(&mut record, &fields.longitude);

        Event {
            device_id,
            event_id,
            event_type,
            timestamp,
            latitude,
            longitude,
            custom_data: apply_rules(record, &self.event_attributes),
        }
    }

    fn extract_object(&self, mut record: Map<String, Value>) -> SmartObject {
        let fields = &self.fields;
        let device_id = take_string(&mut record, &fields.device_id);
        let object_type = take_string(&mut record, &fields.object_type);
        let owner_username = take_string(&mut record, &fields.owner_username);
        let timestamp = self.take_timestamp(&mut record, &fields.timestamp);
        let registration_date = self.take_timestamp(&mut record, &fields.registration_date);
        let last_update_timestamp = self.take_timestamp(&mut record, &fields.last_update);
        let registration_latitude = take_number(&mut record, &fields.latitude);
        let registration_longitude = take_number(&mut record, &fields.longitude);

        SmartObject {
            device_id,
            object_type,
            owner_username,
            timestamp,
            registration_date,
            last_update_timestamp,
            registration_latitude,
            registration_longitude,
            custom_attributes: apply_rules(record, &self.object_attributes),
        }
    }

    fn take_timestamp(&self, record: &mut Map<String, Value>, key: &str) -> Option<String> {
        match record.remove(key)? {
            Value::Number(epoch) if self.normalize_timestamps => {
                epoch_to_iso8601(&epoch).or_else(|| {
                    warn!("{} value {} is out of range for a timestamp", key, epoch);
                    Some(epoch.to_string())
                })
            }
            value => scalar_to_string(key, value),
        }
    }
}

fn into_mapping(input: Value) -> Result<Map<String, Value>, ForwarderError> {
    match input {
        Value::Object(record) => Ok(record),
        other => Err(ForwarderError::InvalidInput(format!(
            "expected a mapping, got: {}",
            other
        ))),
    }
}

fn take_string(record: &mut Map<String, Value>, key: &str) -> Option<String> {
    let value = record.remove(key)?;
    scalar_to_string(key, value)
}

fn scalar_to_string(key: &str, value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => {
            warn!("ignoring non-scalar value for {}: {}", key, other);
            None
        }
    }
}

fn take_number(record: &mut Map<String, Value>, key: &str) -> Option<f64> {
    match record.remove(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().or_else(|| {
            warn!("ignoring non-numeric value for {}: {}", key, s);
            None
        }),
        Value::Null => None,
        other => {
            warn!("ignoring non-numeric value for {}: {}", key, other);
            None
        }
    }
}

// Epoch seconds, fractional part kept to the millisecond.
fn epoch_to_iso8601(epoch: &Number) -> Option<String> {
    let millis = (epoch.as_f64()? * 1000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn apply_rules(record: Map<String, Value>, rules: &AttributeRules) -> Map<String, Value> {
    record
        .into_iter()
        .filter(|(key, _)| !rules.blacklist.contains(key))
        .map(|(key, value)| match rules.rename.get(&key) {
            Some(renamed) => (renamed.clone(), value),
            None => (key, value),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    fn mapper() -> FieldMapper {
        FieldMapper::new(FieldNames::default())
    }

    #[test]
    fn test_map_to_event_with_device_id() {
        let input = json!({"foo": "abc123", "baz": "def456", "device_id": "1234", "event_type": "dummy_event"});
        let event = mapper().map_to_event(input).unwrap();
        assert_eq!(event.device_id.as_deref(), Some("1234"));
        assert_eq!(event.event_type.as_deref(), Some("dummy_event"));
        assert_eq!(event.custom_data.len(), 2);
        assert_eq!(event.custom_data["foo"], json!("abc123"));
        assert_eq!(event.custom_data["baz"], json!("def456"));
    }

    #[test]
    fn test_map_to_event_wo_device_id() {
        let event = mapper()
            .map_to_event(json!({"foo": "abc123", "baz": "def456"}))
            .unwrap();
        assert_eq!(event.device_id, None);
        assert_eq!(event.event_type, None);
        assert_eq!(event.missing_required_fields(), vec!["device_id", "event_type"]);
    }

    #[test]
    fn test_map_to_event_rejects_non_mapping() {
        let result = mapper().map_to_event(json!(["device_id", "1234"]));
        assert!(matches!(result, Err(ForwarderError::InvalidInput(_))));
        let result = mapper().map_to_object(json!("1234"));
        assert!(matches!(result, Err(ForwarderError::InvalidInput(_))));
    }

    #[test]
    fn test_map_to_event_with_custom_field_names() {
        let fields = FieldNames {
            device_id: "serial".to_string(),
            event_type: "kind".to_string(),
            ..Default::default()
        };
        let input = json!({"serial": "A-1", "kind": "boot", "device_id": "not-me"});
        let event = FieldMapper::new(fields).map_to_event(input).unwrap();
        assert_eq!(event.device_id.as_deref(), Some("A-1"));
        assert_eq!(event.event_type.as_deref(), Some("boot"));
        assert_eq!(event.custom_data["device_id"], json!("not-me"));
    }

    #[test]
    fn test_map_to_event_coordinates() {
        let input = json!({"device_id": "1234", "latitude": 45.5, "longitude": "-73.6", "event_id": "e-1"});
        let event = mapper().map_to_event(input).unwrap();
        assert_eq!(event.latitude, Some(45.5));
        assert_eq!(event.longitude, Some(-73.6));
        assert_eq!(event.event_id.as_deref(), Some("e-1"));
        assert!(event.custom_data.is_empty());
    }

    #[test]
    fn test_map_to_object_with_everything() {
        let input = json!({
            "device_id": "1234",
            "object_type": "dummy_object",
            "owner_username": "yo@yomama.com",
            "registration_date": "2016-01-01T00:00:00Z",
            "last_update": "2016-02-01T00:00:00Z",
            "latitude": 1.5,
            "longitude": 2.5
        });
        let object = mapper().map_to_object(input).unwrap();
        assert_eq!(object.device_id.as_deref(), Some("1234"));
        assert_eq!(object.object_type.as_deref(), Some("dummy_object"));
        assert_eq!(object.owner_username.as_deref(), Some("yo@yomama.com"));
        assert_eq!(object.registration_date.as_deref(), Some("2016-01-01T00:00:00Z"));
        assert_eq!(object.last_update_timestamp.as_deref(), Some("2016-02-01T00:00:00Z"));
        assert_eq!(object.registration_latitude, Some(1.5));
        assert_eq!(object.registration_longitude, Some(2.5));
        assert!(object.custom_attributes.is_empty());
        assert!(object.missing_required_fields().is_empty());
    }

    #[test]
    fn test_map_to_object_wo_object_type() {
        let object = mapper()
            .map_to_object(json!({"device_id": "1234", "owner_username": "yo@yomama.com"}))
            .unwrap();
        assert_eq!(object.object_type, None);
        assert_eq!(object.missing_required_fields(), vec!["object_type"]);
    }

    #[test]
    fn test_map_iot_event_with_default_event_type() {
        let input = json!({"device_id": "1234", "temperature": 32, "humidity": 0.45});
        let event = mapper().map_iot_event(input, "aws_iot_event").unwrap();
        assert_eq!(event.event_type.as_deref(), Some("aws_iot_event"));
        assert_eq!(event.custom_data["temperature"], json!(32));
        assert_eq!(event.custom_data["humidity"], json!(0.45));
    }

    #[test]
    fn test_map_iot_event_keeps_event_type() {
        let input = json!({"device_id": "1234", "event_type": "temperature_change"});
        let event = mapper().map_iot_event(input, "aws_iot_event").unwrap();
        assert_eq!(event.event_type.as_deref(), Some("temperature_change"));
    }

    #[test]
    fn test_map_shadow_update_forces_event_type() {
        let input = json!({
            "device_id": "1234",
            "event_type": "ignored",
            "state": {"reported": {"temperature": 32, "humidity": 0.45, "event_type": "also_ignored"}}
        });
        let event = mapper().map_shadow_update(input, "shadow_update").unwrap();
        assert_eq!(event.device_id.as_deref(), Some("1234"));
        assert_eq!(event.event_type.as_deref(), Some("shadow_update"));
        assert_eq!(event.custom_data.len(), 2);
        assert_eq!(event.custom_data["temperature"], json!(32));
    }

    #[test]
    fn test_map_shadow_update_prefers_reported_device_id() {
        let input = json!({
            "device_id": "top",
            "state": {"reported": {"device_id": "reported", "t": 1}}
        });
        let event = mapper().map_shadow_update(input, "shadow_update").unwrap();
        assert_eq!(event.device_id.as_deref(), Some("reported"));
        assert_eq!(event.custom_data.len(), 1);
        assert!(!event.custom_data.contains_key("device_id"));
    }

    #[test]
    fn test_map_shadow_update_rejects_non_mapping_reported_state() {
        let input = json!({"device_id": "1234", "state": {"reported": "on"}});
        assert!(matches!(
            mapper().map_shadow_update(input, "shadow_update"),
            Err(ForwarderError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_map_thing_to_object_with_everything() {
        let thing = json!({
            "thingName": "1234",
            "thingTypeName": "temperatureThing",
            "attributes": {
                "owner_username": "yo@yomama.com",
                "firmware_version": "0.1",
                "model": "temperature-thingy",
                "latitude": "45.50"
            }
        });
        let object = mapper().map_thing_to_object(thing).unwrap();
        assert_eq!(object.device_id.as_deref(), Some("1234"));
        assert_eq!(object.object_type.as_deref(), Some("temperatureThing"));
        assert_eq!(object.owner_username.as_deref(), Some("yo@yomama.com"));
        assert_eq!(object.registration_latitude, Some(45.5));
        assert_eq!(object.custom_attributes["firmware_version"], json!("0.1"));
        assert_eq!(object.custom_attributes["model"], json!("temperature-thingy"));
    }

    #[test]
    fn test_map_thing_to_object_wo_thing_name() {
        let thing = json!({"thingTypeName": "temperatureThing", "attributes": {"model": "x"}});
        let object = mapper().map_thing_to_object(thing).unwrap();
        assert_eq!(object.device_id, None);
        assert_eq!(object.missing_required_fields(), vec!["device_id"]);
    }

    #[test]
    fn test_blacklist_is_checked_before_rename() {
        let rules = AttributeRules {
            rename: HashMap::from([
                ("temp".to_string(), "temperature".to_string()),
                ("secret".to_string(), "not_secret".to_string()),
            ]),
            blacklist: HashSet::from(["secret".to_string()]),
        };
        let input = json!({"device_id": "1234", "temp": 21, "secret": "s3cr3t", "other": 1});
        let event = mapper()
            .with_event_attributes(rules.clone())
            .map_to_event(input.clone())
            .unwrap();
        assert_eq!(event.custom_data.get("temperature"), Some(&json!(21)));
        assert!(!event.custom_data.contains_key("temp"));
        assert!(!event.custom_data.contains_key("secret"));
        assert!(!event.custom_data.contains_key("not_secret"));
        assert_eq!(event.custom_data.get("other"), Some(&json!(1)));

        // rules are per record kind
        let object = mapper().map_to_object(input).unwrap();
        assert!(object.custom_attributes.contains_key("temp"));
        assert!(object.custom_attributes.contains_key("secret"));
    }

    #[test]
    fn test_timestamp_normalization() {
        let input = json!({
            "device_id": "1234",
            "timestamp": 1_500_000_000,
            "registration_date": "2017-07-14T02:40:00Z",
            "last_update": 1_500_000_000.25
        });

        let event = mapper()
            .with_timestamp_normalization(true)
            .map_to_event(input.clone())
            .unwrap();
        assert_eq!(event.timestamp.as_deref(), Some("2017-07-14T02:40:00.000Z"));

        let object = mapper()
            .with_timestamp_normalization(true)
            .map_to_object(input.clone())
            .unwrap();
        assert_eq!(object.timestamp.as_deref(), Some("2017-07-14T02:40:00.000Z"));
        assert_eq!(object.registration_date.as_deref(), Some("2017-07-14T02:40:00Z"));
        assert_eq!(object.last_update_timestamp.as_deref(), Some("2017-07-14T02:40:00.250Z"));

        let event = mapper().map_to_event(input).unwrap();
        assert_eq!(event.timestamp.as_deref(), Some("1500000000"));
    }

    #[test]
    fn test_absent_timestamp_stays_absent() {
        let event = mapper()
            .with_timestamp_normalization(true)
            .map_to_event(json!({"device_id": "1234", "timestamp": null}))
            .unwrap();
        assert_eq!(event.timestamp, None);
    }
}
