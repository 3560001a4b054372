use serde_json::{Map, Value};

/// One telemetry occurrence attributed to a smart object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub device_id: Option<String>,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub timestamp: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub custom_data: Map<String, Value>,
}

/// Registration record of a device on the platform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartObject {
    pub device_id: Option<String>,
    pub object_type: Option<String>,
    pub owner_username: Option<String>,
    pub timestamp: Option<String>,
    pub registration_date: Option<String>,
    pub last_update_timestamp: Option<String>,
    pub registration_latitude: Option<f64>,
    pub registration_longitude: Option<f64>,
    pub custom_attributes: Map<String, Value>,
}

impl Event {
    /// Names of the attributes the platform requires before accepting the event.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.device_id.is_none() {
            missing.push("device_id");
        }
        if self.event_type.is_none() {
            missing.push("event_type");
        }
        missing
    }
}

impl SmartObject {
    pub fn with_device_id(device_id: impl Into<String>) -> Self {
        SmartObject {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.device_id.is_none() {
            missing.push("device_id");
        }
        if self.object_type.is_none() {
            missing.push("object_type");
        }
        missing
    }
}
