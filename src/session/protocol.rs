//! Control channel wire format
//!
//! Every frame is a JSON object with a `type` field. Inbound settings messages
//! carry the parameter envelope inline next to `type`.

use serde::Serialize;
use serde_json::Value;

use crate::domain::{BidSettings, ItemIdentity};
use crate::error::{AutobidError, Result};

/// Messages sent to the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Id and image under both the controller's names and the descriptive ones
    Register {
        #[serde(rename = "productId")]
        product_id: String,
        #[serde(rename = "imageUrl")]
        image_url: String,
        #[serde(rename = "itemId")]
        item_id: String,
        #[serde(rename = "imageRef")]
        image_ref: String,
    },
}

impl OutboundMessage {
    pub fn register(identity: &ItemIdentity) -> Self {
        Self::Register {
            product_id: identity.id.clone(),
            image_url: identity.image_ref.clone(),
            item_id: identity.id.clone(),
            image_ref: identity.image_ref.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Store parameters and preview prices, do not arm
    ApplySettings(BidSettings),
    /// Store parameters and arm a new run
    Start(BidSettings),
    Stop,
    /// Well-formed, but a type this agent does not handle
    Unknown(String),
}

impl ControlMessage {
    pub fn kind(&self) -> &str {
        match self {
            ControlMessage::ApplySettings(_) => "apply_settings",
            ControlMessage::Start(_) => "start",
            ControlMessage::Stop => "stop",
            ControlMessage::Unknown(kind) => kind,
        }
    }

    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AutobidError::Protocol("message has no type".into()))?
            .to_string();

        match kind.as_str() {
            "apply_settings" => Ok(ControlMessage::ApplySettings(serde_json::from_value(value)?)),
            "start" => Ok(ControlMessage::Start(serde_json::from_value(value)?)),
            "stop" => Ok(ControlMessage::Stop),
            _ => Ok(ControlMessage::Unknown(kind)),
        }
    }
}
