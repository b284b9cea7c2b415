//! The board's single owned state value and its transition functions.
//!
//! Every path that changes the board (user mutations, write confirmations,
//! ingested remote events) goes through these methods, so the no-duplication
//! invariant is repaired in one place before any snapshot is published.

use std::collections::HashSet;

use shared::domain::{CardId, ColumnKey};
use shared::protocol::{CardChange, CardRecord};

/// Ordered per-lane view of the board's cards.
///
/// Invariant: a card id appears in at most one lane, at most once. Mutations
/// that could violate it call [`BoardState::dedupe`], which keeps the first
/// occurrence in lane display order and discards the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardState {
    lanes: [Vec<CardRecord>; ColumnKey::ALL.len()],
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            lanes: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the board from a bulk load. Rows arrive ordered by position and
    /// are partitioned into their declared lane (`todo` fallback), keeping the
    /// first occurrence of any duplicated id.
    pub fn from_load(cards: Vec<CardRecord>) -> Self {
        let mut board = Self::new();
        for card in cards {
            let lane = card.lane();
            board.lanes[lane.index()].push(card);
        }
        board.dedupe();
        board
    }

    pub fn lane(&self, key: ColumnKey) -> &[CardRecord] {
        &self.lanes[key.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(Vec::is_empty)
    }

    pub fn contains(&self, id: CardId) -> bool {
        self.find(id).is_some()
    }

    pub fn card(&self, id: CardId) -> Option<&CardRecord> {
        let (lane, index) = self.find(id)?;
        Some(&self.lanes[lane.index()][index])
    }

    /// Locate a card: owning lane plus its index within that lane.
    pub fn find(&self, id: CardId) -> Option<(ColumnKey, usize)> {
        for lane in ColumnKey::ALL {
            if let Some(index) = self.lanes[lane.index()].iter().position(|c| c.id == id) {
                return Some((lane, index));
            }
        }
        None
    }

    pub fn owning_lane(&self, id: CardId) -> Option<ColumnKey> {
        self.find(id).map(|(lane, _)| lane)
    }

    /// Insert at the top of a lane, then repair the invariant.
    pub fn insert_front(&mut self, lane: ColumnKey, card: CardRecord) {
        self.lanes[lane.index()].insert(0, card);
        self.dedupe();
    }

    /// Re-insert a card at a specific slot, clamped to the lane's length.
    /// Used by failure rollback; repairs the invariant afterwards.
    pub fn insert_at(&mut self, lane: ColumnKey, index: usize, card: CardRecord) {
        let seq = &mut self.lanes[lane.index()];
        let index = index.min(seq.len());
        seq.insert(index, card);
        self.dedupe();
    }

    /// Remove every occurrence of an id. Returns the first occurrence (lane,
    /// index, record) so callers can roll the removal back.
    pub fn remove(&mut self, id: CardId) -> Option<(ColumnKey, usize, CardRecord)> {
        let mut removed = None;
        for lane in ColumnKey::ALL {
            let seq = &mut self.lanes[lane.index()];
            while let Some(index) = seq.iter().position(|c| c.id == id) {
                let card = seq.remove(index);
                if removed.is_none() {
                    removed = Some((lane, index, card));
                }
            }
        }
        removed
    }

    /// Splice a card from one slot to another within a lane. Out-of-range
    /// `from` is a no-op; `to` is clamped. Returns whether anything moved.
    pub fn reorder(&mut self, lane: ColumnKey, from: usize, to: usize) -> bool {
        let seq = &mut self.lanes[lane.index()];
        if from >= seq.len() {
            return false;
        }
        let card = seq.remove(from);
        let to = to.min(seq.len());
        seq.insert(to, card);
        from != to
    }

    /// Move a card to `lane` at `index` (clamped), wherever it currently
    /// lives. Returns the source lane, or `None` when the id is unknown.
    pub fn relocate(&mut self, id: CardId, lane: ColumnKey, index: usize) -> Option<ColumnKey> {
        let (source, _, card) = self.remove(id)?;
        let seq = &mut self.lanes[lane.index()];
        let index = index.min(seq.len());
        seq.insert(index, card);
        self.dedupe();
        Some(source)
    }

    /// Overwrite a card's record in place, wherever it lives. Returns false
    /// when the id is unknown (e.g. deleted while an edit was in flight).
    pub fn replace(&mut self, record: CardRecord) -> bool {
        match self.find(record.id) {
            Some((lane, index)) => {
                self.lanes[lane.index()][index] = record;
                true
            }
            None => false,
        }
    }

    /// Discard duplicate ids, keeping the first occurrence in lane display
    /// order. The repair step run before every published snapshot.
    pub fn dedupe(&mut self) {
        let mut seen: HashSet<CardId> = HashSet::new();
        for lane in ColumnKey::ALL {
            self.lanes[lane.index()].retain(|card| seen.insert(card.id));
        }
    }

    /// Reducer for ingested remote change events. Inserts are idempotent,
    /// updates re-home the card to its declared lane's end, deletes remove
    /// unconditionally. Echo gating happens in the caller; this is the pure
    /// transition.
    pub fn apply_change(&mut self, change: CardChange) {
        match change {
            CardChange::Insert { new } => {
                if !self.contains(new.id) {
                    let lane = new.lane();
                    self.lanes[lane.index()].insert(0, new);
                }
            }
            CardChange::Update { new, .. } => {
                self.remove(new.id);
                let lane = new.lane();
                self.lanes[lane.index()].push(new);
            }
            CardChange::Delete { old } => {
                self.remove(old.id);
            }
        }
        self.dedupe();
    }

    pub fn card_count(&self) -> usize {
        self.lanes.iter().map(Vec::len).sum()
    }

    /// All card ids on the board, in lane display order.
    pub fn ids(&self) -> Vec<CardId> {
        ColumnKey::ALL
            .iter()
            .flat_map(|lane| self.lanes[lane.index()].iter().map(|c| c.id))
            .collect()
    }
}
