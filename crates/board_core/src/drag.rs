//! Mapping from drag-surface events to board positions.
//!
//! The drag surface reports what the pointer is over (a lane's empty drop
//! zone or another card) plus pointer geometry. Everything here recomputes
//! from the current target, so rapid repeated drag-over calls are idempotent.

use shared::domain::{CardId, ColumnKey};

use crate::state::BoardState;

/// Pointer geometry for a hover over another card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoverGeometry {
    pub pointer_y: f32,
    /// Vertical midpoint of the hovered card's rendered box.
    pub midpoint_y: f32,
}

impl HoverGeometry {
    /// Past the midpoint means the dragged card lands below the hovered one.
    pub fn past_midpoint(self) -> bool {
        self.pointer_y > self.midpoint_y
    }
}

/// What the drag surface reports the pointer is currently over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropTarget {
    /// A lane's empty drop-zone sentinel.
    Lane(ColumnKey),
    /// Another card on the board.
    Card(CardId),
}

/// Resolve a drop target to the lane that owns it. Unknown card ids yield
/// `None`; callers must treat that as a no-op.
pub fn resolve_lane(board: &BoardState, target: DropTarget) -> Option<ColumnKey> {
    match target {
        DropTarget::Lane(key) => Some(key),
        DropTarget::Card(id) => board.owning_lane(id),
    }
}

/// Index at which the dragged card should land in `lane` for this hover.
/// Empty-zone hovers append; card hovers insert before or after the hovered
/// card depending on the pointer's side of its midpoint. The dragged card is
/// assumed to still live in a *different* lane, so indices here are stable.
pub fn insertion_index(
    board: &BoardState,
    lane: ColumnKey,
    target: DropTarget,
    hover: Option<HoverGeometry>,
) -> usize {
    let cards = board.lane(lane);
    match target {
        DropTarget::Lane(_) => cards.len(),
        DropTarget::Card(over_id) => {
            let Some(over_at) = cards.iter().position(|c| c.id == over_id) else {
                return cards.len();
            };
            match hover {
                Some(geometry) if geometry.past_midpoint() => over_at + 1,
                _ => over_at,
            }
        }
    }
}
