//! Client-side board reconciliation.
//!
//! One owned state value, the per-lane ordered card view, is kept consistent
//! across optimistic local mutations, asynchronous confirmation or failure of
//! the remote writes those mutations issue, and real-time change notifications
//! pushed by the store for every client's writes, our own included.

pub mod banner;
pub mod drag;
pub mod pending;
pub mod reconciler;
pub mod state;

pub use drag::{DropTarget, HoverGeometry};
pub use reconciler::{BoardReconciler, BoardSnapshot, CardEdit, LaneView, ValidationError};
pub use state::BoardState;
