use serde::Deserialize;
use serde_json::{Map, Value};

/// Device shadow update document as published on `$aws/things/<name>/shadow/update/accepted`.
/// Only the reported state is forwarded, the rest of the document is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ShadowDocument {
    #[serde(default)]
    pub state: Option<ShadowState>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShadowState {
    #[serde(default)]
    pub reported: Option<Map<String, Value>>,
}

impl ShadowDocument {
    /// The reported state, empty when the document has none.
    pub fn into_reported(self) -> Map<String, Value> {
        self.state
            .and_then(|state| state.reported)
            .unwrap_or_default()
    }
}
