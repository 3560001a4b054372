use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::string::String;
use std::env;

use aws_config::SdkConfig;
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;
use tracing::{error, info};

use crate::error::ForwarderError;

pub struct Config {
    pub environment: Environment,
    pub endpoint: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub trigger_type: TriggerType,
    pub use_object_cache: bool,
    pub cache_max_entries: usize,
    pub cache_validity_period: u64,
    pub fields: FieldNames,
    pub shadow_update_default_event_type: String,
    pub iot_mqtt_default_event_type: String,
    pub normalize_timestamps: bool,
    pub event_attributes: AttributeRules,
    pub object_attributes: AttributeRules,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Environment {
    Production,
    Sandbox,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://rest.api.mnubo.com",
            Environment::Sandbox => "https://rest.sandbox.mnubo.com",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Sandbox => write!(f, "sandbox"),
        }
    }
}

pub fn select_environment(env_name: &str) -> Result<Environment, ForwarderError> {
    let environment = match env_name {
        "production" => Environment::Production,
        "sandbox" => Environment::Sandbox,
        other => {
            error!("Wrong environment value: {}", other);
            return Err(ForwarderError::InvalidConfiguration(format!(
                "do not know about env {}",
                other
            )));
        }
    };
    info!("Loading with environment: {}", environment);
    Ok(environment)
}

/// The shape of the documents a deployment receives. Each one selects a
/// different mapping entry point and a different source for object metadata.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum TriggerType {
    Event,
    IotEvent,
    ShadowUpdate,
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "Event" => Ok(TriggerType::Event),
            "IotEvent" => Ok(TriggerType::IotEvent),
            "IoT" => Ok(TriggerType::IotEvent),
            "ShadowUpdate" => Ok(TriggerType::ShadowUpdate),
            other => Err(format!("Invalid or Unsupported trigger type {}", other)),
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Names of the input fields consumed into typed attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    pub device_id: String,
    pub event_id: String,
    pub event_type: String,
    pub owner_username: String,
    pub object_type: String,
    pub timestamp: String,
    pub latitude: String,
    pub longitude: String,
    pub last_update: String,
    pub registration_date: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        FieldNames {
            device_id: "device_id".to_string(),
            event_id: "event_id".to_string(),
            event_type: "event_type".to_string(),
            owner_username: "owner_username".to_string(),
            object_type: "object_type".to_string(),
            timestamp: "timestamp".to_string(),
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
            last_update: "last_update".to_string(),
            registration_date: "registration_date".to_string(),
        }
    }
}

impl FieldNames {
    fn load_from_env() -> FieldNames {
        let defaults = FieldNames::default();
        let var = |name: &str, default: String| env::var(name).unwrap_or(default);
        FieldNames {
            device_id: var("DEVICE_ID_FIELD", defaults.device_id),
            event_id: var("EVENT_ID_FIELD", defaults.event_id),
            event_type: var("EVENT_TYPE_FIELD", defaults.event_type),
            owner_username: var("OWNER_USERNAME_FIELD", defaults.owner_username),
            object_type: var("OBJECT_TYPE_FIELD", defaults.object_type),
            timestamp: var("TIMESTAMP_FIELD", defaults.timestamp),
            latitude: var("LATITUDE_FIELD", defaults.latitude),
            longitude: var("LONGITUDE_FIELD", defaults.longitude),
            last_update: var("LAST_UPDATE_FIELD", defaults.last_update),
            registration_date: var("REGISTRATION_DATE_FIELD", defaults.registration_date),
        }
    }
}

/// Renames and drops applied to leftover custom keys of one record kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeRules {
    pub rename: HashMap<String, String>,
    pub blacklist: HashSet<String>,
}

impl AttributeRules {
    fn load_from_env(mapping_var: &str, blacklist_var: &str) -> Result<Self, ForwarderError> {
        let rename = match env::var(mapping_var).ok().filter(|s| !s.trim().is_empty()) {
            Some(raw) => serde_json::from_str::<HashMap<String, String>>(&raw).map_err(|e| {
                ForwarderError::InvalidConfiguration(format!(
                    "error parsing {} as a JSON object of strings - {}",
                    mapping_var, e
                ))
            })?,
            None => HashMap::new(),
        };
        let blacklist = env::var(blacklist_var)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();

        Ok(AttributeRules { rename, blacklist })
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool, ForwarderError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(ForwarderError::InvalidConfiguration(format!(
                "error parsing {} to bool - {}",
                name, other
            ))),
        },
    }
}

fn parse_positive<T>(name: &str, default: &str) -> Result<T, ForwarderError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let value = env::var(name)
        .unwrap_or(default.to_string())
        .trim()
        .parse::<T>()
        .map_err(|e| {
            ForwarderError::InvalidConfiguration(format!("error parsing {} to integer - {}", name, e))
        })?;
    if value <= T::default() {
        return Err(ForwarderError::InvalidConfiguration(format!(
            "{} must be a strictly positive integer",
            name
        )));
    }
    Ok(value)
}

impl Config {
    pub fn load_from_env() -> Result<Config, ForwarderError> {
        let environment = select_environment(&env::var("MNUBO_ENV").unwrap_or("sandbox".to_string()))?;

        let conf = Config {
            environment,
            endpoint: env::var("MNUBO_ENDPOINT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(environment.base_url().to_string()),
            client_id: env::var("MNUBO_CLIENT_ID").ok(),
            client_secret: env::var("MNUBO_CLIENT_SECRET").ok(),
            trigger_type: env::var("TRIGGER_TYPE")
                .unwrap_or("Event".to_string())
                .parse::<TriggerType>()
                .map_err(ForwarderError::InvalidConfiguration)?,
            use_object_cache: parse_bool("USE_OBJECT_CACHE", true)?,
            cache_max_entries: parse_positive::<usize>("CACHE_MAX_ENTRIES", "1000000")?,
            cache_validity_period: parse_positive::<u64>("CACHE_VALIDITY_PERIOD", "3600")?,
            fields: FieldNames::load_from_env(),
            shadow_update_default_event_type: env::var("SHADOW_UPDATE_DEFAULT_EVENT_TYPE")
                .unwrap_or("shadow_update".to_string()),
            iot_mqtt_default_event_type: env::var("IOT_MQTT_DEFAULT_EVENT_TYPE")
                .unwrap_or("aws_iot_event".to_string()),
            normalize_timestamps: parse_bool("NORMALIZE_TIMESTAMPS", false)?,
            event_attributes: AttributeRules::load_from_env(
                "EVENT_ATTRIBUTE_MAPPING",
                "EVENT_ATTRIBUTE_BLACKLIST",
            )?,
            object_attributes: AttributeRules::load_from_env(
                "OBJECT_ATTRIBUTE_MAPPING",
                "OBJECT_ATTRIBUTE_BLACKLIST",
            )?,
        };

        Ok(conf)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum KeySourceError {
    #[error("Failed to access AWS Secrets Manager. Please make sure the lambda function has permissions to access the {secret_id} secret. Error: {error:?}")]
    FailedToAccessSecretsManager {
        secret_id: String,
        error: GetSecretValueError,
    },
    #[error("Didn't find the {secret_id} secret in AWS secretsmanager")]
    MissingSecret { secret_id: String },
}

pub async fn get_client_secret_from_secrets_manager(
    aws_config: &SdkConfig,
    secret_id: String,
) -> Result<String, KeySourceError> {
    let secretsmanager = aws_sdk_secretsmanager::Client::new(aws_config);
    let response = secretsmanager
        .get_secret_value()
        .set_secret_id(Some(secret_id.clone()))
        .send()
        .await
        .map_err(|error| KeySourceError::FailedToAccessSecretsManager {
            secret_id: secret_id.clone(),
            error: error.into_service_error(),
        })?;
    response
        .secret_string
        .ok_or(KeySourceError::MissingSecret { secret_id })
}
