//! Update messages posted by running jobs and external updaters.
//!
//! Messages arrive as `key=<JSON>`, where the JSON carries the target item id
//! and a list of posts:
//!
//! ```text
//! post={"item_id":3,"posts":[{"type":"FILE_CREATED","message":"/work/out.dat"}]}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::ItemId;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    UpdaterStarted,
    FileCreated,
    FileModified,
    FileDeleted,
    MessagePosted,
    ProgressUpdated,
    ConvergenceUpdated,
    UpdaterStopped,
}

impl MessageType {
    pub fn is_file_event(&self) -> bool {
        matches!(
            self,
            MessageType::FileCreated | MessageType::FileModified | MessageType::FileDeleted
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    #[serde(default)]
    pub id: u64,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, alias = "message")]
    pub content: String,
    #[serde(default)]
    pub item_id: ItemId,
}

impl Message {
    pub fn new(item_id: ItemId, message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            time: Utc::now(),
            message_type,
            content: content.into(),
            item_id,
        }
    }
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Update message has no '=' separator")]
    MissingSeparator,
    #[error("Update message payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Invalid item id in update message: {0}")]
    InvalidItemId(String),
    #[error("Update message carries no posts")]
    Empty,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawItemId {
    Number(u64),
    Text(String),
}

impl RawItemId {
    fn resolve(self) -> Result<ItemId, MessageError> {
        match self {
            RawItemId::Number(n) => {
                ItemId::try_from(n).map_err(|_| MessageError::InvalidItemId(n.to_string()))
            }
            RawItemId::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| MessageError::InvalidItemId(s.clone())),
        }
    }
}

#[derive(Deserialize)]
struct UpdateEnvelope {
    item_id: RawItemId,
    #[serde(default)]
    posts: Vec<Message>,
}

/// Parse a `key=<JSON>` update into messages addressed to one item.
///
/// A malformed payload is rejected as a whole.
pub fn parse_update_message(raw: &str) -> Result<Vec<Message>, MessageError> {
    let (_key, payload) = raw.split_once('=').ok_or(MessageError::MissingSeparator)?;
    let envelope: UpdateEnvelope = serde_json::from_str(payload.trim())?;
    let item_id = envelope.item_id.resolve()?;

    if envelope.posts.is_empty() {
        return Err(MessageError::Empty);
    }

    Ok(envelope
        .posts
        .into_iter()
        .map(|mut message| {
            message.item_id = item_id;
            message
        })
        .collect())
}
