use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CardId, ColumnKey};

/// A labelled external link attached to a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardLink {
    pub label: String,
    pub url: String,
}

/// A card row as the store returns it. `column_key` is kept as the raw stored
/// string so rows with missing or unknown lanes still deserialize; resolution
/// happens through [`CardRecord::lane`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: CardId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<CardLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_key: Option<String>,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardRecord {
    /// Lane this card belongs to. Missing or unknown keys fall back to `todo`.
    pub fn lane(&self) -> ColumnKey {
        self.column_key
            .as_deref()
            .and_then(ColumnKey::parse)
            .unwrap_or(ColumnKey::Todo)
    }
}

/// A column row as the store returns it. Keys outside the fixed lane set are
/// tolerated on the wire and skipped by the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRecord {
    pub key: String,
    pub title: String,
    pub position: i64,
}

impl ColumnRecord {
    pub fn lane(&self) -> Option<ColumnKey> {
        ColumnKey::parse(&self.key)
    }
}

/// Payload for creating a card. The server assigns id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<CardLink>,
    pub column_key: ColumnKey,
    pub position: i64,
}

/// Partial update for a card. Absent fields are left untouched by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<CardLink>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_key: Option<ColumnKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Identity carried by a delete notification. Stores routinely strip the rest
/// of the row from the `old` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedCard {
    pub id: CardId,
}

/// One row change fanned out by the store to every subscriber, the caller's
/// own writes included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CardChange {
    Insert {
        new: CardRecord,
    },
    Update {
        new: CardRecord,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old: Option<CardRecord>,
    },
    Delete {
        old: DeletedCard,
    },
}

impl CardChange {
    pub fn card_id(&self) -> CardId {
        match self {
            CardChange::Insert { new } => new.id,
            CardChange::Update { new, .. } => new.id,
            CardChange::Delete { old } => old.id,
        }
    }
}

/// State of the realtime subscription, surfaced to the presentation layer as
/// the connectivity indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}
