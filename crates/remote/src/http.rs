//! REST + websocket implementation of [`RemoteStore`] against the managed
//! store's HTTP surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use shared::domain::CardId;
use shared::error::ApiError;
use shared::protocol::{
    CardChange, CardDraft, CardPatch, CardRecord, ColumnRecord, ConnectionStatus,
};

use crate::{RemoteEvent, RemoteStore, StoreError};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Client for the managed store: REST for reads and writes, a websocket
/// stream for change fan-out. One instance serves any number of subscribers.
pub struct HttpRemoteStore {
    http: Client,
    server_url: String,
    events: broadcast::Sender<RemoteEvent>,
    stream_started: Arc<AtomicBool>,
}

impl HttpRemoteStore {
    pub fn new(server_url: impl Into<String>) -> Result<Self, StoreError> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Url::parse(&server_url)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            http: Client::new(),
            server_url,
            events,
            stream_started: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open the realtime channel and spawn a reader task that forwards change
    /// frames to subscribers until the socket closes. Status transitions are
    /// delivered on the same stream. Reconnection is left to the caller.
    pub async fn connect_realtime(&self) -> Result<(), StoreError> {
        if self.stream_started.swap(true, Ordering::SeqCst) {
            debug!("realtime: change stream already running");
            return Ok(());
        }

        let ws_url = self.change_stream_url()?;
        let _ = self
            .events
            .send(RemoteEvent::Status(ConnectionStatus::Connecting));

        let (ws_stream, _) = match connect_async(ws_url.as_str()).await {
            Ok(connected) => connected,
            Err(err) => {
                self.stream_started.store(false, Ordering::SeqCst);
                let _ = self
                    .events
                    .send(RemoteEvent::Status(ConnectionStatus::Disconnected));
                return Err(StoreError::Realtime(format!(
                    "failed to connect change stream at {ws_url}: {err}"
                )));
            }
        };
        let (_, mut ws_reader) = ws_stream.split();

        let _ = self
            .events
            .send(RemoteEvent::Status(ConnectionStatus::Connected));

        let events = self.events.clone();
        let stream_started = Arc::clone(&self.stream_started);
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<CardChange>(&text) {
                        Ok(change) => {
                            let _ = events.send(RemoteEvent::Change(change));
                        }
                        Err(err) => {
                            warn!("realtime: dropping unparseable change frame: {err}");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("realtime: receive failed: {err}");
                        break;
                    }
                }
            }
            stream_started.store(false, Ordering::SeqCst);
            let _ = events.send(RemoteEvent::Status(ConnectionStatus::Disconnected));
        });

        Ok(())
    }

    fn change_stream_url(&self) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.server_url)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(StoreError::Realtime(format!(
                    "store url must be http or https, got {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| StoreError::Realtime("store url cannot carry a ws scheme".to_string()))?;
        url.set_path("/cards/stream");
        Ok(url)
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ApiError>().await {
        Ok(body) => Err(StoreError::Api(body)),
        Err(_) => Err(StoreError::Status(status)),
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_columns(&self) -> Result<Vec<ColumnRecord>, StoreError> {
        let response = self
            .http
            .get(format!("{}/columns", self.server_url))
            .query(&[("order", "position")])
            .send()
            .await?;
        Ok(expect_success(response).await?.json().await?)
    }

    async fn list_cards(&self) -> Result<Vec<CardRecord>, StoreError> {
        let response = self
            .http
            .get(format!("{}/cards", self.server_url))
            .query(&[("order", "position")])
            .send()
            .await?;
        Ok(expect_success(response).await?.json().await?)
    }

    async fn create_card(&self, draft: CardDraft) -> Result<CardRecord, StoreError> {
        let response = self
            .http
            .post(format!("{}/cards", self.server_url))
            .json(&draft)
            .send()
            .await?;
        Ok(expect_success(response).await?.json().await?)
    }

    async fn update_card(&self, id: CardId, patch: CardPatch) -> Result<CardRecord, StoreError> {
        let response = self
            .http
            .patch(format!("{}/cards/{}", self.server_url, id.0))
            .json(&patch)
            .send()
            .await?;
        Ok(expect_success(response).await?.json().await?)
    }

    async fn delete_card(&self, id: CardId) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(format!("{}/cards/{}", self.server_url, id.0))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }
}
