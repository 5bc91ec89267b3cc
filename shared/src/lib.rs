//! Domain records shared between the automation engine and the services that
//! feed it (form intake, pipeline boards, the messaging bridge).

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

// ==================== Automations ====================

/// What causes an automation to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    FormSubmission,
    StageEntry { stage_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub trigger: Trigger,
    /// Execution order.
    pub actions: Vec<Action>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub const SEND_MESSAGE: &str = "send_message";
pub const ADD_TAG: &str = "add_tag";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageConfig {
    #[serde(default)]
    pub message_template: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTagConfig {
    /// Opaque tag reference; numeric ids from older builders load as text.
    #[serde(default, deserialize_with = "opaque_id")]
    pub tag_id: Option<String>,
}

fn opaque_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id)),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected text or a number, got {}", other))),
    }
}

/// One step of an automation, stored as a JSON object tagged by `type`.
///
/// Loading a stored action never fails. Types this build does not know about
/// are kept verbatim in [`Action::Unrecognized`] so that definitions written
/// by newer builders load, run (as skips) and save back without losing data.
/// A known type whose configuration does not decode, or an element that is
/// not an object at all, becomes [`Action::Invalid`] and fails on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendMessage(SendMessageConfig),
    AddTag(AddTagConfig),
    Unrecognized {
        /// `None` when the stored object carried no string `type`.
        action_type: Option<String>,
        config: Value,
    },
    Invalid {
        action_type: String,
        /// The element exactly as stored.
        raw: Value,
        reason: String,
    },
}

impl Action {
    pub fn send_message(template: &str) -> Self {
        Self::SendMessage(SendMessageConfig {
            message_template: template.to_string(),
        })
    }

    pub fn add_tag(tag_id: &str) -> Self {
        Self::AddTag(AddTagConfig {
            tag_id: Some(tag_id.to_string()),
        })
    }

    /// The `type` discriminator as written in storage.
    pub fn kind(&self) -> &str {
        match self {
            Self::SendMessage(_) => SEND_MESSAGE,
            Self::AddTag(_) => ADD_TAG,
            Self::Unrecognized { action_type, .. } => action_type.as_deref().unwrap_or(""),
            Self::Invalid { action_type, .. } => action_type,
        }
    }

    /// Decodes one stored element.
    pub fn from_stored(raw: Value) -> Self {
        let mut object = match raw {
            Value::Object(object) => object,
            other => {
                return Self::Invalid {
                    action_type: String::new(),
                    reason: format!("action must be a JSON object, got {}", other),
                    raw: other,
                };
            }
        };

        let action_type = match object.get("type") {
            Some(Value::String(kind)) => Some(kind.clone()),
            _ => None,
        };

        let decoded = match action_type.as_deref() {
            Some(SEND_MESSAGE) => serde_json::from_value(Value::Object(object.clone())).map(Self::SendMessage),
            Some(ADD_TAG) => serde_json::from_value(Value::Object(object.clone())).map(Self::AddTag),
            _ => {
                if action_type.is_some() {
                    object.remove("type");
                }
                return Self::Unrecognized {
                    action_type,
                    config: Value::Object(object),
                };
            }
        };

        decoded.unwrap_or_else(|e| Self::Invalid {
            action_type: action_type.unwrap_or_default(),
            raw: Value::Object(object),
            reason: e.to_string(),
        })
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (config, action_type) = match self {
            Self::SendMessage(config) => (
                serde_json::to_value(config).map_err(S::Error::custom)?,
                Some(SEND_MESSAGE),
            ),
            Self::AddTag(config) => (serde_json::to_value(config).map_err(S::Error::custom)?, Some(ADD_TAG)),
            Self::Unrecognized { action_type, config } => (config.clone(), action_type.as_deref()),
            Self::Invalid { raw, .. } => return raw.serialize(serializer),
        };

        let mut object = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(action_type) = action_type {
            object.insert("type".to_string(), Value::String(action_type.to_string()));
        }
        object.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_stored)
    }
}

// ==================== People ====================

/// The person an automation runs for. Owned by the CRM; read-only here.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl Person {
    pub fn first_name(&self) -> &str {
        self.name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
            .unwrap_or("")
    }

    /// Phone number usable as a recipient address, if any.
    pub fn recipient_address(&self) -> Option<&str> {
        self.phone
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonTag {
    pub person_id: Uuid,
    pub tag_id: String,
    pub created_at: DateTime<Utc>,
}

// ==================== Messaging ====================

/// A tenant's connection to the messaging provider.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider: String,
    pub instance_name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "conversation_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub channel_config_id: Uuid,
    pub recipient_address: String,
    pub contact_name: Option<String>,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "message_direction", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "message_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Document,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub direction: MessageDirection,
    pub content: String,
    pub message_type: MessageType,
    pub is_ai_generated: bool,
    pub created_at: DateTime<Utc>,
}

/// A message about to be appended to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub direction: MessageDirection,
    pub content: String,
    pub message_type: MessageType,
    pub is_ai_generated: bool,
}

impl NewMessage {
    /// Plain text sent by an automation (never AI-originated).
    pub fn automated_text(conversation_id: Uuid, content: String) -> Self {
        Self {
            conversation_id,
            direction: MessageDirection::Outbound,
            content,
            message_type: MessageType::Text,
            is_ai_generated: false,
        }
    }
}
