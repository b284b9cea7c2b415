use serde::{Deserialize, Serialize};

/// Server-assigned row identity for a card. Stable for the card's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardId(pub i64);

/// The fixed set of board lanes. `ALL` is the fallback display order when the
/// store has no column rows for some lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKey {
    Todo,
    Doing,
    Done,
    Temp,
}

impl ColumnKey {
    pub const ALL: [ColumnKey; 4] = [
        ColumnKey::Todo,
        ColumnKey::Doing,
        ColumnKey::Done,
        ColumnKey::Temp,
    ];

    /// Parse a raw lane key as stored in card rows. Unknown keys yield `None`;
    /// callers decide the fallback.
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "todo" => Some(ColumnKey::Todo),
            "doing" => Some(ColumnKey::Doing),
            "done" => Some(ColumnKey::Done),
            "temp" => Some(ColumnKey::Temp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKey::Todo => "todo",
            ColumnKey::Doing => "doing",
            ColumnKey::Done => "done",
            ColumnKey::Temp => "temp",
        }
    }

    /// Lane title used when the store has no column row for this lane.
    pub fn display_name(self) -> &'static str {
        match self {
            ColumnKey::Todo => "Todo",
            ColumnKey::Doing => "Doing",
            ColumnKey::Done => "Done",
            ColumnKey::Temp => "Temp",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}
