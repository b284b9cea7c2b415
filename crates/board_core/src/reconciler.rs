//! The Board Reconciler: mutation entry points driven by user gestures, plus
//! an ingestion path driven by the store's change stream.
//!
//! Every mutation is two-phase. Phase 1 applies to local state synchronously
//! (except create, which needs a server-assigned id first) so the UI reflects
//! intent immediately. Phase 2 is the remote write; on failure the banner is
//! raised and, where a pre-image exists, the optimistic change is rolled back.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use remote::{RemoteEvent, RemoteStore, StoreError};
use shared::domain::{CardId, ColumnKey};
use shared::protocol::{
    CardChange, CardDraft, CardLink, CardPatch, ColumnRecord, ConnectionStatus,
};

use crate::banner::{self, describe_failure, FailureContext};
use crate::drag::{self, DropTarget, HoverGeometry};
use crate::pending::{PendingWrites, ECHO_SUPPRESS_WINDOW};
use crate::state::BoardState;

const SNAPSHOT_CHANNEL_CAPACITY: usize = 256;

/// Rejected user input. Surfaced on the banner and returned to the caller;
/// nothing is sent to the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("card title must not be empty")]
    EmptyTitle,
    #[error("link {label:?} has an invalid url {url:?}")]
    InvalidLinkUrl { label: String, url: String },
}

/// Fields a user can change from the card editor. `None` leaves the field
/// untouched; an empty description clears it.
#[derive(Debug, Clone, Default)]
pub struct CardEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub links: Option<Vec<CardLink>>,
}

/// One lane as the presentation layer renders it, cards top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneView {
    pub key: ColumnKey,
    pub title: String,
    pub cards: Vec<shared::protocol::CardRecord>,
}

/// Read-only view handed to the presentation layer on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSnapshot {
    pub lanes: Vec<LaneView>,
    pub status: ConnectionStatus,
    pub banner: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct DragOrigin {
    card: CardId,
    lane: ColumnKey,
}

struct ReconcilerState {
    board: BoardState,
    columns: Vec<ColumnRecord>,
    pending: PendingWrites,
    status: ConnectionStatus,
    banner: Option<String>,
    drag_origin: Option<DragOrigin>,
}

pub struct BoardReconciler {
    store: Arc<dyn RemoteStore>,
    inner: Mutex<ReconcilerState>,
    snapshots: broadcast::Sender<BoardSnapshot>,
}

impl BoardReconciler {
    pub fn new(store: Arc<dyn RemoteStore>) -> Arc<Self> {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Arc::new(Self {
            store,
            inner: Mutex::new(ReconcilerState {
                board: BoardState::new(),
                columns: Vec::new(),
                pending: PendingWrites::new(),
                status: ConnectionStatus::Connecting,
                banner: None,
                drag_origin: None,
            }),
            snapshots,
        })
    }

    /// Subscribe to snapshot publications. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<BoardSnapshot> {
        self.snapshots.subscribe()
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        let inner = self.inner.lock().await;
        build_snapshot(&inner)
    }

    pub async fn dismiss_banner(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.banner = None;
        }
        self.publish().await;
    }

    /// Initial bulk load. On failure the board stays empty and a load banner
    /// is raised; there is no automatic retry.
    pub async fn load(&self) {
        let columns = match self.store.list_columns().await {
            Ok(columns) => columns,
            Err(err) => {
                self.fail(FailureContext::Load, &err).await;
                return;
            }
        };
        let cards = match self.store.list_cards().await {
            Ok(cards) => cards,
            Err(err) => {
                self.fail(FailureContext::Load, &err).await;
                return;
            }
        };
        let count = cards.len();
        {
            let mut inner = self.inner.lock().await;
            inner.columns = columns;
            inner.board = BoardState::from_load(cards);
        }
        info!(cards = count, "board loaded");
        self.publish().await;
    }

    /// Create a card in `lane`. There is no optimistic phase, since the card
    /// needs a server-assigned id: local state changes only on success, after
    /// which the lane's positions are re-persisted (the prepend shifted every
    /// existing card down one slot).
    pub async fn add_card(
        self: &Arc<Self>,
        lane: ColumnKey,
        title: &str,
        description: Option<String>,
        links: Vec<CardLink>,
    ) -> anyhow::Result<()> {
        if let Err(err) = validate_title(title).and_then(|()| validate_links(&links)) {
            return Err(self.reject(err).await);
        }
        let draft = CardDraft {
            title: title.trim().to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            links,
            column_key: lane,
            position: 0,
        };
        match self.store.create_card(draft).await {
            Ok(record) => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.board.insert_front(lane, record);
                }
                self.publish().await;
                self.persist_positions(lane).await;
                Ok(())
            }
            Err(err) => {
                self.fail(FailureContext::Create, &err).await;
                Err(err.into())
            }
        }
    }

    /// Merge edited fields into the local record immediately, then persist
    /// with a fresh timestamp. On failure the captured pre-image is restored.
    pub async fn edit_card(self: &Arc<Self>, id: CardId, edit: CardEdit) -> anyhow::Result<()> {
        if let Some(title) = &edit.title {
            if let Err(err) = validate_title(title) {
                return Err(self.reject(err).await);
            }
        }
        if let Some(links) = &edit.links {
            if let Err(err) = validate_links(links) {
                return Err(self.reject(err).await);
            }
        }

        let pre_image = {
            let mut inner = self.inner.lock().await;
            let Some(current) = inner.board.card(id).cloned() else {
                debug!(card = id.0, "edit for unknown card ignored");
                return Ok(());
            };
            let mut updated = current.clone();
            if let Some(title) = &edit.title {
                updated.title = title.trim().to_string();
            }
            if let Some(description) = &edit.description {
                updated.description = if description.trim().is_empty() {
                    None
                } else {
                    Some(description.clone())
                };
            }
            if let Some(links) = &edit.links {
                updated.links = links.clone();
            }
            updated.updated_at = Utc::now();
            inner.board.replace(updated);
            inner.pending.mark(id);
            current
        };
        self.publish().await;

        let patch = CardPatch {
            title: edit.title.map(|t| t.trim().to_string()),
            description: edit.description,
            links: edit.links,
            updated_at: Some(Utc::now()),
            ..CardPatch::default()
        };
        match self.store.update_card(id, patch).await {
            Ok(_) => {
                self.release_after_echo_window(id);
                Ok(())
            }
            Err(err) => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.board.replace(pre_image);
                    inner.pending.release(id);
                }
                self.fail(FailureContext::Update, &err).await;
                Err(err.into())
            }
        }
    }

    /// Remove immediately, delete remotely, then re-persist the lane's
    /// positions. On failure the card is restored at its prior slot.
    pub async fn delete_card(self: &Arc<Self>, id: CardId) -> anyhow::Result<()> {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.board.remove(id)
        };
        let Some((lane, index, card)) = removed else {
            debug!(card = id.0, "delete for unknown card ignored");
            return Ok(());
        };
        self.publish().await;

        match self.store.delete_card(id).await {
            Ok(()) => {
                self.persist_positions(lane).await;
                Ok(())
            }
            Err(err) => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.board.insert_at(lane, index, card);
                }
                self.fail(FailureContext::Delete, &err).await;
                Err(err.into())
            }
        }
    }

    /// Splice within a lane, then re-persist every card's position in that
    /// lane as its current index (0-based, sequence order = ascending
    /// position).
    pub async fn reorder_card(
        self: &Arc<Self>,
        lane: ColumnKey,
        from: usize,
        to: usize,
    ) -> anyhow::Result<()> {
        let moved = {
            let mut inner = self.inner.lock().await;
            inner.board.reorder(lane, from, to)
        };
        if !moved {
            return Ok(());
        }
        self.publish().await;
        self.persist_positions(lane).await;
        Ok(())
    }

    /// Move a card to the end of `to`, persist the column change, then
    /// re-persist positions of both lanes. The id is marked for echo
    /// suppression across the write and its notification round trip. On
    /// failure the card moves back and the marker is released immediately.
    pub async fn move_card(self: &Arc<Self>, id: CardId, to: ColumnKey) -> anyhow::Result<()> {
        let origin = {
            let mut inner = self.inner.lock().await;
            let Some((lane, index)) = inner.board.find(id) else {
                debug!(card = id.0, "move for unknown card ignored");
                return Ok(());
            };
            if lane == to {
                return Ok(());
            }
            inner.board.relocate(id, to, usize::MAX);
            inner.pending.mark(id);
            (lane, index)
        };
        self.publish().await;

        let patch = CardPatch {
            column_key: Some(to),
            updated_at: Some(Utc::now()),
            ..CardPatch::default()
        };
        match self.store.update_card(id, patch).await {
            Ok(_) => {
                self.persist_positions(origin.0).await;
                self.persist_positions(to).await;
                self.release_after_echo_window(id);
                Ok(())
            }
            Err(err) => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.board.relocate(id, origin.0, origin.1);
                    inner.pending.release(id);
                }
                self.fail(FailureContext::Update, &err).await;
                Err(err.into())
            }
        }
    }

    /// Record where a drag started; drag-end compares against the final lane
    /// to decide between a same-lane reorder and a cross-lane move.
    pub async fn drag_start(&self, id: CardId) {
        let mut inner = self.inner.lock().await;
        if let Some(lane) = inner.board.owning_lane(id) {
            inner.drag_origin = Some(DragOrigin { card: id, lane });
        }
    }

    /// Cross-lane hover preview: place the dragged card at the computed index
    /// in the hovered lane, locally only. Same-lane hovers are left to the
    /// drop; unknown targets no-op. The index is recomputed wholesale from the
    /// current pointer target, so rapid repeated calls are idempotent.
    pub async fn drag_over(
        &self,
        id: CardId,
        target: Option<DropTarget>,
        hover: Option<HoverGeometry>,
    ) {
        let Some(target) = target else { return };
        let changed = {
            let mut inner = self.inner.lock().await;
            let Some(lane) = drag::resolve_lane(&inner.board, target) else {
                return;
            };
            match inner.board.owning_lane(id) {
                Some(current) if current != lane => {
                    let index = drag::insertion_index(&inner.board, lane, target, hover);
                    inner.board.relocate(id, lane, index);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish().await;
        }
    }

    /// Finish a drag. Relative to the drag's origin lane, a same-lane drop
    /// splices to the target card's slot and re-persists that lane; a
    /// cross-lane drop runs the full move mutation. An absent target signals
    /// an aborted drag and is a no-op.
    pub async fn drag_end(
        self: &Arc<Self>,
        id: CardId,
        target: Option<DropTarget>,
    ) -> anyhow::Result<()> {
        let origin = {
            let mut inner = self.inner.lock().await;
            inner.drag_origin.take()
        };
        let Some(target) = target else {
            return Ok(());
        };

        let final_lane = {
            let mut inner = self.inner.lock().await;
            let Some(lane) = drag::resolve_lane(&inner.board, target) else {
                return Ok(());
            };
            let Some((current, from)) = inner.board.find(id) else {
                return Ok(());
            };
            if current == lane {
                // The drag-over preview already landed the card here; fine-tune
                // to the hovered card's slot.
                if let DropTarget::Card(over_id) = target {
                    if let Some(to) = inner.board.lane(lane).iter().position(|c| c.id == over_id) {
                        inner.board.reorder(lane, from, to);
                    }
                }
            } else {
                let index = drag::insertion_index(&inner.board, lane, target, None);
                inner.board.relocate(id, lane, index);
            }
            lane
        };
        self.publish().await;

        let origin_lane = origin
            .filter(|o| o.card == id)
            .map(|o| o.lane)
            .unwrap_or(final_lane);
        if origin_lane == final_lane {
            self.persist_positions(final_lane).await;
            return Ok(());
        }

        {
            let mut inner = self.inner.lock().await;
            inner.pending.mark(id);
        }
        let patch = CardPatch {
            column_key: Some(final_lane),
            updated_at: Some(Utc::now()),
            ..CardPatch::default()
        };
        match self.store.update_card(id, patch).await {
            Ok(_) => {
                self.persist_positions(origin_lane).await;
                self.persist_positions(final_lane).await;
                self.release_after_echo_window(id);
                Ok(())
            }
            Err(err) => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.board.relocate(id, origin_lane, usize::MAX);
                    inner.pending.release(id);
                }
                self.fail(FailureContext::Update, &err).await;
                Err(err.into())
            }
        }
    }

    /// Drain the store's change stream until it closes. Change frames run
    /// through the same reducer as local mutations; update echoes for marked
    /// ids are dropped.
    pub fn spawn_ingest(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.store.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RemoteEvent::Change(change)) => this.ingest_change(change).await,
                    Ok(RemoteEvent::Status(status)) => this.apply_status(status).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change stream lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn ingest_change(&self, change: CardChange) {
        {
            let mut inner = self.inner.lock().await;
            if let CardChange::Update { new, .. } = &change {
                if inner.pending.suppresses(new.id) {
                    debug!(card = new.id.0, "suppressed own update echo");
                    return;
                }
            }
            inner.board.apply_change(change);
        }
        self.publish().await;
    }

    async fn apply_status(&self, status: ConnectionStatus) {
        {
            let mut inner = self.inner.lock().await;
            if inner.status == ConnectionStatus::Connected
                && status == ConnectionStatus::Disconnected
            {
                inner.banner = Some(banner::realtime_lost());
            }
            inner.status = status;
        }
        self.publish().await;
    }

    /// Write every card's position in `lane` as its current index, all rows in
    /// parallel. The sequence is read at issue time, so a pass raced by a
    /// newer reorder writes the newer order and stays idempotent. Each row is
    /// echo-marked: the store fans position updates back like any other write.
    async fn persist_positions(self: &Arc<Self>, lane: ColumnKey) {
        let rows: Vec<(CardId, i64)> = {
            let mut inner = self.inner.lock().await;
            let rows: Vec<(CardId, i64)> = inner
                .board
                .lane(lane)
                .iter()
                .enumerate()
                .map(|(index, card)| (card.id, index as i64))
                .collect();
            for (id, _) in &rows {
                inner.pending.mark(*id);
            }
            rows
        };
        if rows.is_empty() {
            return;
        }

        let store = &self.store;
        let writes = rows.iter().map(|&(id, position)| async move {
            let patch = CardPatch {
                position: Some(position),
                updated_at: Some(Utc::now()),
                ..CardPatch::default()
            };
            (id, store.update_card(id, patch).await)
        });

        let mut first_failure: Option<StoreError> = None;
        for (id, result) in join_all(writes).await {
            match result {
                Ok(_) => self.release_after_echo_window(id),
                Err(err) => {
                    warn!(card = id.0, lane = lane.as_str(), %err, "position write failed");
                    self.inner.lock().await.pending.release(id);
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_failure {
            self.fail(FailureContext::Positions, &err).await;
        }
    }

    /// Release an echo marker once the store's change notification for the
    /// completed write has had time to arrive.
    fn release_after_echo_window(self: &Arc<Self>, id: CardId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            sleep(ECHO_SUPPRESS_WINDOW).await;
            this.inner.lock().await.pending.release(id);
        });
    }

    async fn reject(&self, err: ValidationError) -> anyhow::Error {
        {
            let mut inner = self.inner.lock().await;
            inner.banner = Some(err.to_string());
        }
        self.publish().await;
        anyhow::Error::new(err)
    }

    async fn fail(&self, context: FailureContext, err: &StoreError) {
        warn!(?context, %err, "remote write failed");
        {
            let mut inner = self.inner.lock().await;
            inner.banner = Some(describe_failure(context, err));
        }
        self.publish().await;
    }

    async fn publish(&self) {
        let snapshot = {
            let inner = self.inner.lock().await;
            build_snapshot(&inner)
        };
        let _ = self.snapshots.send(snapshot);
    }
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    Ok(())
}

fn validate_links(links: &[CardLink]) -> Result<(), ValidationError> {
    for link in links {
        if Url::parse(&link.url).is_err() {
            return Err(ValidationError::InvalidLinkUrl {
                label: link.label.clone(),
                url: link.url.clone(),
            });
        }
    }
    Ok(())
}

fn build_snapshot(state: &ReconcilerState) -> BoardSnapshot {
    BoardSnapshot {
        lanes: lane_order(&state.columns)
            .into_iter()
            .map(|lane| LaneView {
                key: lane,
                title: lane_title(&state.columns, lane),
                cards: state.board.lane(lane).to_vec(),
            })
            .collect(),
        status: state.status,
        banner: state.banner.clone(),
    }
}

/// Display order: the store's column rows (already position-ordered) filtered
/// to known lanes, then any lane the store has no row for, in fallback order.
fn lane_order(columns: &[ColumnRecord]) -> Vec<ColumnKey> {
    let mut order: Vec<ColumnKey> = Vec::with_capacity(ColumnKey::ALL.len());
    for column in columns {
        if let Some(lane) = column.lane() {
            if !order.contains(&lane) {
                order.push(lane);
            }
        }
    }
    for lane in ColumnKey::ALL {
        if !order.contains(&lane) {
            order.push(lane);
        }
    }
    order
}

fn lane_title(columns: &[ColumnRecord], lane: ColumnKey) -> String {
    columns
        .iter()
        .find(|c| c.lane() == Some(lane))
        .map(|c| c.title.clone())
        .unwrap_or_else(|| lane.display_name().to_string())
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
