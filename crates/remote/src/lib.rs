//! Remote store capability: the board's only persistence and fan-out surface.
//!
//! The reconciler never talks to a database directly; it consumes this trait.
//! `HttpRemoteStore` maps it onto the managed store's REST endpoints and
//! websocket change stream. `MissingRemoteStore` stands in before an endpoint
//! is configured and fails every call.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use shared::domain::CardId;
use shared::error::ApiError;
use shared::protocol::{
    CardChange, CardDraft, CardPatch, CardRecord, ColumnRecord, ConnectionStatus,
};

mod http;

pub use http::HttpRemoteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store rejected the request: {0}")]
    Api(#[from] ApiError),
    #[error("remote store returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("remote store transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote store sent an unparseable response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid store endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("realtime channel failed: {0}")]
    Realtime(String),
    #[error("remote store is not configured")]
    Unavailable,
}

/// Events fanned out to subscribers of the store's change stream.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// A row change on the card table, own writes included.
    Change(CardChange),
    /// Realtime channel status transition.
    Status(ConnectionStatus),
}

/// Capability contract for the external managed store.
///
/// `list_columns` and `list_cards` return rows ordered ascending by position.
/// The server assigns card ids and timestamps on create.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_columns(&self) -> Result<Vec<ColumnRecord>, StoreError>;
    async fn list_cards(&self) -> Result<Vec<CardRecord>, StoreError>;
    async fn create_card(&self, draft: CardDraft) -> Result<CardRecord, StoreError>;
    async fn update_card(&self, id: CardId, patch: CardPatch) -> Result<CardRecord, StoreError>;
    async fn delete_card(&self, id: CardId) -> Result<(), StoreError>;

    /// Subscribe to the change stream. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent>;
}

/// Fallback store used when no endpoint is configured. Every call fails and
/// the change stream never produces an event.
pub struct MissingRemoteStore {
    events: broadcast::Sender<RemoteEvent>,
}

impl MissingRemoteStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for MissingRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MissingRemoteStore {
    async fn list_columns(&self) -> Result<Vec<ColumnRecord>, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn list_cards(&self) -> Result<Vec<CardRecord>, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn create_card(&self, _draft: CardDraft) -> Result<CardRecord, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn update_card(&self, _id: CardId, _patch: CardPatch) -> Result<CardRecord, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn delete_card(&self, _id: CardId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
