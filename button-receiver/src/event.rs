//! Wire format of the ESP8266 button topic.
//!
//! A `ButtonEvent` only exists once a payload has been decoded successfully;
//! anything else is a `DecodeError` and the payload is dropped by the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action emitted by the firmware when the physical button goes LOW.
pub const BUTTON_PRESSED: &str = "button_pressed";

/// Erreurs de décodage d'un payload bouton
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid button JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("field `device` must not be empty")]
    EmptyDevice,
}

/// Décodé depuis `{"device", "action", "timestamp", "status"}`.
/// Seul `device` est obligatoire : les autres champs absents prennent leur
/// valeur zéro (`""`, `0`) et l'événement est dispatché quand même.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonEvent {
    /// Identifiant du matériel émetteur (ex: esp8266_lolin)
    pub device: String,
    /// Action rapportée, connue du dispatcher ou non
    #[serde(default)]
    pub action: String,
    /// Horloge locale du device en millisecondes (`millis()` côté firmware).
    /// Never compare it with receipt time or with other devices.
    #[serde(default)]
    pub timestamp: i64,
    /// Libellé de statut libre
    #[serde(default)]
    pub status: String,
}

impl ButtonEvent {
    /// The payload must be a JSON object with a non-empty `device`; present
    /// fields must have the right type. Unknown fields are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(payload)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject(json_kind(&value)));
        }

        let event: ButtonEvent = serde_json::from_value(value)?;
        if event.device.trim().is_empty() {
            return Err(DecodeError::EmptyDevice);
        }
        Ok(event)
    }

    /// Sérialise l'événement au format wire
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
