use super::*;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use shared::protocol::{CardRecord, DeletedCard};
use tokio::time::{advance, timeout, Duration};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct FakeRemoteStore {
    next_id: AtomicI64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    columns: Vec<ColumnRecord>,
    cards: Vec<CardRecord>,
    created: Mutex<Vec<CardDraft>>,
    updates: Mutex<Vec<(CardId, CardPatch)>>,
    deletes: Mutex<Vec<CardId>>,
    events: broadcast::Sender<RemoteEvent>,
}

impl FakeRemoteStore {
    fn with_cards(cards: Vec<CardRecord>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            next_id: AtomicI64::new(100),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            columns: vec![
                ColumnRecord {
                    key: "todo".to_string(),
                    title: "Todo".to_string(),
                    position: 0,
                },
                ColumnRecord {
                    key: "doing".to_string(),
                    title: "Doing".to_string(),
                    position: 1,
                },
            ],
            cards,
            created: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            events,
        })
    }

    fn empty() -> Arc<Self> {
        Self::with_cards(Vec::new())
    }

    fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn push_change(&self, change: CardChange) {
        let _ = self.events.send(RemoteEvent::Change(change));
    }

    fn push_status(&self, status: ConnectionStatus) {
        let _ = self.events.send(RemoteEvent::Status(status));
    }

    async fn position_writes(&self) -> Vec<(i64, i64)> {
        self.updates
            .lock()
            .await
            .iter()
            .filter_map(|(id, patch)| patch.position.map(|p| (id.0, p)))
            .collect()
    }
}

#[async_trait]
impl RemoteStore for FakeRemoteStore {
    async fn list_columns(&self) -> Result<Vec<ColumnRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.columns.clone())
    }

    async fn list_cards(&self) -> Result<Vec<CardRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.cards.clone())
    }

    async fn create_card(&self, draft: CardDraft) -> Result<CardRecord, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let id = CardId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = CardRecord {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            links: draft.links.clone(),
            column_key: Some(draft.column_key.as_str().to_string()),
            position: draft.position,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.created.lock().await.push(draft);
        Ok(record)
    }

    async fn update_card(&self, id: CardId, patch: CardPatch) -> Result<CardRecord, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.updates.lock().await.push((id, patch));
        Ok(sample_card(id.0, "todo"))
    }

    async fn delete_card(&self, id: CardId) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.deletes.lock().await.push(id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }
}

fn sample_card(id: i64, lane: &str) -> CardRecord {
    CardRecord {
        id: CardId(id),
        title: format!("card {id}"),
        description: None,
        links: Vec::new(),
        column_key: Some(lane.to_string()),
        position: 0,
        created_at: "2025-06-01T00:00:00Z".parse().expect("timestamp"),
        updated_at: "2025-06-01T00:00:00Z".parse().expect("timestamp"),
    }
}

fn lane_ids(snapshot: &BoardSnapshot, key: ColumnKey) -> Vec<i64> {
    snapshot
        .lanes
        .iter()
        .find(|lane| lane.key == key)
        .map(|lane| lane.cards.iter().map(|c| c.id.0).collect())
        .unwrap_or_default()
}

// Give spawned tasks a chance to run on the current-thread runtime before
// asserting on state. Only needed where no snapshot publication can be
// awaited, i.e. when the event under test is expected to be dropped.
async fn drain_until_settled() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn load_partitions_cards_into_their_declared_lanes() {
    let store = FakeRemoteStore::with_cards(vec![
        sample_card(1, "todo"),
        sample_card(2, "doing"),
        sample_card(3, "nonsense"),
    ]);
    let board = BoardReconciler::new(store);
    board.load().await;

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![1, 3]);
    assert_eq!(lane_ids(&snapshot, ColumnKey::Doing), vec![2]);
    assert_eq!(snapshot.banner, None);
}

#[tokio::test]
async fn load_failure_raises_a_banner_and_leaves_the_board_empty() {
    let store = FakeRemoteStore::empty();
    store.set_fail_reads(true);
    let board = BoardReconciler::new(store);
    board.load().await;

    let snapshot = board.snapshot().await;
    assert!(snapshot.lanes.iter().all(|lane| lane.cards.is_empty()));
    let banner = snapshot.banner.expect("banner");
    assert!(banner.contains("load the board"), "unexpected banner: {banner}");
}

#[tokio::test]
async fn add_card_prepends_the_canonical_record_and_repersists_positions() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board
        .add_card(ColumnKey::Todo, "Write spec", None, Vec::new())
        .await
        .expect("add");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![100, 1]);

    let created = store.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].title, "Write spec");
    assert_eq!(created[0].position, 0);
    drop(created);

    // The prepend shifted every card: the whole lane is re-persisted.
    assert_eq!(store.position_writes().await, vec![(100, 0), (1, 1)]);
}

#[tokio::test]
async fn add_card_with_an_empty_title_never_reaches_the_store() {
    let store = FakeRemoteStore::empty();
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    let err = board
        .add_card(ColumnKey::Todo, "   ", None, Vec::new())
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("title"));
    assert!(store.created.lock().await.is_empty());

    let snapshot = board.snapshot().await;
    assert!(snapshot.banner.expect("banner").contains("title"));
}

#[tokio::test]
async fn add_card_with_an_invalid_link_url_never_reaches_the_store() {
    let store = FakeRemoteStore::empty();
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    let links = vec![CardLink {
        label: "docs".to_string(),
        url: "not a url".to_string(),
    }];
    board
        .add_card(ColumnKey::Todo, "Write spec", None, links)
        .await
        .expect_err("must fail");
    assert!(store.created.lock().await.is_empty());
}

#[tokio::test]
async fn add_card_failure_surfaces_a_banner_without_local_mutation() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    store.set_fail_writes(true);

    board
        .add_card(ColumnKey::Todo, "Write spec", None, Vec::new())
        .await
        .expect_err("must fail");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![1]);
    assert!(snapshot.banner.expect("banner").contains("create the card"));
}

#[tokio::test]
async fn edit_card_merges_fields_optimistically() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board
        .edit_card(
            CardId(1),
            CardEdit {
                title: Some("Write the spec".to_string()),
                ..CardEdit::default()
            },
        )
        .await
        .expect("edit");

    let snapshot = board.snapshot().await;
    let todo = &snapshot.lanes[0];
    assert_eq!(todo.cards[0].title, "Write the spec");

    let updates = store.updates.lock().await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, CardId(1));
    assert_eq!(updates[0].1.title.as_deref(), Some("Write the spec"));
    assert!(updates[0].1.updated_at.is_some());
}

#[tokio::test]
async fn edit_card_failure_restores_the_pre_image() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    store.set_fail_writes(true);

    board
        .edit_card(
            CardId(1),
            CardEdit {
                title: Some("Write the spec".to_string()),
                ..CardEdit::default()
            },
        )
        .await
        .expect_err("must fail");

    let snapshot = board.snapshot().await;
    assert_eq!(snapshot.lanes[0].cards[0].title, "card 1");
    assert!(snapshot.banner.expect("banner").contains("save the card"));
}

#[tokio::test]
async fn delete_card_removes_immediately_and_repersists_the_lane() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo"), sample_card(2, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board.delete_card(CardId(1)).await.expect("delete");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![2]);
    assert_eq!(*store.deletes.lock().await, vec![CardId(1)]);
    assert_eq!(store.position_writes().await, vec![(2, 0)]);
}

#[tokio::test]
async fn delete_card_failure_restores_the_card_at_its_slot() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo"), sample_card(2, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    store.set_fail_writes(true);

    board.delete_card(CardId(1)).await.expect_err("must fail");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![1, 2]);
    assert!(snapshot.banner.expect("banner").contains("delete the card"));
}

#[tokio::test]
async fn reorder_splices_locally_and_writes_absolute_positions() {
    let store = FakeRemoteStore::with_cards(vec![
        sample_card(1, "todo"),
        sample_card(2, "todo"),
        sample_card(3, "todo"),
    ]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board
        .reorder_card(ColumnKey::Todo, 0, 2)
        .await
        .expect("reorder");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![2, 3, 1]);
    assert_eq!(store.position_writes().await, vec![(2, 0), (3, 1), (1, 2)]);
}

#[tokio::test]
async fn move_card_relocates_exactly_once_and_persists_both_lanes() {
    let store = FakeRemoteStore::with_cards(vec![
        sample_card(1, "todo"),
        sample_card(2, "todo"),
        sample_card(3, "doing"),
    ]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board.move_card(CardId(1), ColumnKey::Doing).await.expect("move");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![2]);
    assert_eq!(lane_ids(&snapshot, ColumnKey::Doing), vec![3, 1]);

    let updates = store.updates.lock().await;
    let column_writes: Vec<_> = updates
        .iter()
        .filter(|(_, patch)| patch.column_key.is_some())
        .collect();
    assert_eq!(column_writes.len(), 1);
    assert_eq!(column_writes[0].0, CardId(1));
    assert_eq!(column_writes[0].1.column_key, Some(ColumnKey::Doing));
    drop(updates);

    // Source lane then target lane, each as absolute indices.
    assert_eq!(
        store.position_writes().await,
        vec![(2, 0), (3, 0), (1, 1)]
    );
}

#[tokio::test]
async fn move_card_failure_moves_the_card_back() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo"), sample_card(2, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    store.set_fail_writes(true);

    board
        .move_card(CardId(1), ColumnKey::Doing)
        .await
        .expect_err("must fail");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![1, 2]);
    assert!(lane_ids(&snapshot, ColumnKey::Doing).is_empty());
}

#[tokio::test]
async fn scenario_add_edit_move_delete() {
    let store = FakeRemoteStore::empty();
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board
        .add_card(ColumnKey::Todo, "Write spec", None, Vec::new())
        .await
        .expect("add");
    let id = {
        let snapshot = board.snapshot().await;
        assert_eq!(lane_ids(&snapshot, ColumnKey::Todo).len(), 1);
        CardId(lane_ids(&snapshot, ColumnKey::Todo)[0])
    };

    board
        .edit_card(
            id,
            CardEdit {
                title: Some("Write the spec".to_string()),
                ..CardEdit::default()
            },
        )
        .await
        .expect("edit");
    assert_eq!(
        board.snapshot().await.lanes[0].cards[0].title,
        "Write the spec"
    );

    board.move_card(id, ColumnKey::Doing).await.expect("move");
    let snapshot = board.snapshot().await;
    assert!(lane_ids(&snapshot, ColumnKey::Todo).is_empty());
    assert_eq!(lane_ids(&snapshot, ColumnKey::Doing), vec![id.0]);

    board.delete_card(id).await.expect("delete");
    let snapshot = board.snapshot().await;
    assert!(lane_ids(&snapshot, ColumnKey::Doing).is_empty());
}

#[tokio::test]
async fn concurrent_adds_with_the_same_title_yield_distinct_cards() {
    let store = FakeRemoteStore::empty();
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    let (first, second) = tokio::join!(
        board.add_card(ColumnKey::Todo, "Write spec", None, Vec::new()),
        board.add_card(ColumnKey::Todo, "Write spec", None, Vec::new()),
    );
    first.expect("first add");
    second.expect("second add");

    let snapshot = board.snapshot().await;
    let ids = lane_ids(&snapshot, ColumnKey::Todo);
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn ingested_insert_for_a_known_id_is_a_no_op() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    board.spawn_ingest();
    let mut snapshots = board.subscribe();

    store.push_change(CardChange::Insert {
        new: sample_card(1, "done"),
    });
    let snapshot = timeout(RECV_TIMEOUT, snapshots.recv())
        .await
        .expect("timely")
        .expect("snapshot");
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![1]);
    assert!(lane_ids(&snapshot, ColumnKey::Done).is_empty());
}

#[tokio::test]
async fn ingested_insert_for_a_new_id_prepends_to_its_lane() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "doing")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    board.spawn_ingest();
    let mut snapshots = board.subscribe();

    store.push_change(CardChange::Insert {
        new: sample_card(2, "doing"),
    });
    let snapshot = timeout(RECV_TIMEOUT, snapshots.recv())
        .await
        .expect("timely")
        .expect("snapshot");
    assert_eq!(lane_ids(&snapshot, ColumnKey::Doing), vec![2, 1]);
}

#[tokio::test]
async fn ingested_delete_removes_the_card_wherever_it_lives() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "doing")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    board.spawn_ingest();
    let mut snapshots = board.subscribe();

    store.push_change(CardChange::Delete {
        old: DeletedCard { id: CardId(1) },
    });
    let snapshot = timeout(RECV_TIMEOUT, snapshots.recv())
        .await
        .expect("timely")
        .expect("snapshot");
    assert!(snapshot.lanes.iter().all(|lane| lane.cards.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn update_echo_is_suppressed_while_marked_then_applied_after_expiry() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo"), sample_card(2, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    board.spawn_ingest();

    board.move_card(CardId(1), ColumnKey::Doing).await.expect("move");

    // The store fans our own column write back; while the marker is live the
    // event must be dropped.
    let mut echoed = sample_card(1, "todo");
    echoed.title = "echoed".to_string();
    store.push_change(CardChange::Update {
        new: echoed.clone(),
        old: None,
    });
    drain_until_settled().await;
    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Doing), vec![1]);
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![2]);

    // Once the echo window has passed, the same update is authoritative.
    advance(ECHO_SUPPRESS_WINDOW + Duration::from_millis(100)).await;
    drain_until_settled().await;
    store.push_change(CardChange::Update {
        new: echoed,
        old: None,
    });
    drain_until_settled().await;

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![2, 1]);
    assert!(lane_ids(&snapshot, ColumnKey::Doing).is_empty());
}

#[tokio::test]
async fn realtime_disconnect_degrades_status_and_raises_a_banner() {
    let store = FakeRemoteStore::empty();
    let board = BoardReconciler::new(store.clone());
    board.load().await;
    board.spawn_ingest();
    let mut snapshots = board.subscribe();

    store.push_status(ConnectionStatus::Connected);
    let snapshot = timeout(RECV_TIMEOUT, snapshots.recv())
        .await
        .expect("timely")
        .expect("snapshot");
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.banner, None);

    store.push_status(ConnectionStatus::Disconnected);
    let snapshot = timeout(RECV_TIMEOUT, snapshots.recv())
        .await
        .expect("timely")
        .expect("snapshot");
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert!(snapshot.banner.expect("banner").contains("disconnected"));
}

#[tokio::test]
async fn drag_over_previews_cross_lane_without_store_writes() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo"), sample_card(2, "doing")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board.drag_start(CardId(1)).await;
    let hover = HoverGeometry {
        pointer_y: 80.0,
        midpoint_y: 50.0,
    };
    board
        .drag_over(CardId(1), Some(DropTarget::Card(CardId(2))), Some(hover))
        .await;

    let snapshot = board.snapshot().await;
    assert!(lane_ids(&snapshot, ColumnKey::Todo).is_empty());
    assert_eq!(lane_ids(&snapshot, ColumnKey::Doing), vec![2, 1]);
    assert!(store.updates.lock().await.is_empty());

    // Repeating the same hover must not change anything further.
    board
        .drag_over(CardId(1), Some(DropTarget::Card(CardId(2))), Some(hover))
        .await;
    assert_eq!(board.snapshot().await, snapshot);
}

#[tokio::test]
async fn drag_end_in_the_origin_lane_reorders_and_persists() {
    let store = FakeRemoteStore::with_cards(vec![
        sample_card(1, "todo"),
        sample_card(2, "todo"),
        sample_card(3, "todo"),
    ]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board.drag_start(CardId(3)).await;
    board
        .drag_end(CardId(3), Some(DropTarget::Card(CardId(1))))
        .await
        .expect("drop");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![3, 1, 2]);
    assert_eq!(store.position_writes().await, vec![(3, 0), (1, 1), (2, 2)]);
    assert!(store
        .updates
        .lock()
        .await
        .iter()
        .all(|(_, patch)| patch.column_key.is_none()));
}

#[tokio::test]
async fn drag_end_across_lanes_runs_the_move_mutation() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo"), sample_card(2, "doing")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board.drag_start(CardId(1)).await;
    board
        .drag_over(CardId(1), Some(DropTarget::Lane(ColumnKey::Doing)), None)
        .await;
    board
        .drag_end(CardId(1), Some(DropTarget::Lane(ColumnKey::Doing)))
        .await
        .expect("drop");

    let snapshot = board.snapshot().await;
    assert!(lane_ids(&snapshot, ColumnKey::Todo).is_empty());
    assert_eq!(lane_ids(&snapshot, ColumnKey::Doing), vec![2, 1]);

    let updates = store.updates.lock().await;
    assert!(updates
        .iter()
        .any(|(id, patch)| *id == CardId(1) && patch.column_key == Some(ColumnKey::Doing)));
}

#[tokio::test]
async fn drag_end_without_a_target_is_an_aborted_drag() {
    let store = FakeRemoteStore::with_cards(vec![sample_card(1, "todo")]);
    let board = BoardReconciler::new(store.clone());
    board.load().await;

    board.drag_start(CardId(1)).await;
    board.drag_end(CardId(1), None).await.expect("abort");

    let snapshot = board.snapshot().await;
    assert_eq!(lane_ids(&snapshot, ColumnKey::Todo), vec![1]);
    assert!(store.updates.lock().await.is_empty());
}

#[tokio::test]
async fn dismissing_the_banner_clears_it() {
    let store = FakeRemoteStore::empty();
    store.set_fail_reads(true);
    let board = BoardReconciler::new(store);
    board.load().await;
    assert!(board.snapshot().await.banner.is_some());

    board.dismiss_banner().await;
    assert_eq!(board.snapshot().await.banner, None);
}
