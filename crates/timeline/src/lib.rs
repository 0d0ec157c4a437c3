use serde::{Deserialize, Serialize};
use thiserror::Error;

mod model;
pub use model::*;
mod commands;
pub use commands::*;
mod groups;
pub use groups::*;
mod transaction;
pub use transaction::*;
mod edit_operations;
pub use edit_operations::*;
mod history;
pub use history::*;
mod session;
pub use session::*;
mod bin_ref;
pub use bin_ref::*;
mod config;
pub use config::*;
mod request;
pub use request::*;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("invalid operation: {0}")]
    InvalidOp(String),
    #[error("item already exists: {0}")]
    ItemExists(ItemId),
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),
    #[error("track index {index} out of range (track count {count})")]
    TrackIndexOutOfRange { index: isize, count: usize },
    #[error("group already exists: {0}")]
    GroupExists(GroupId),
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),
    #[error("group {0} still has members or a parent")]
    GroupNotEmpty(GroupId),
    #[error("item {0} belongs to a group")]
    ItemGrouped(ItemId),
    #[error("group {group} cannot be placed under {parent}")]
    GroupCycle { group: GroupId, parent: GroupId },
    #[error("media source not found: {0}")]
    MediaNotFound(String),
    #[error("item {item} would overlap {other} on track {track}")]
    Overlap {
        item: ItemId,
        other: ItemId,
        track: TrackId,
    },
    #[error("invalid duration {0}")]
    InvalidDuration(Frame),
    #[error("item {0} exceeds its media bounds")]
    OutOfMediaBounds(ItemId),
    #[error("item {0} is not on a track")]
    NotOnTrack(ItemId),
    #[error("position {position} is not inside item {item}")]
    PositionOutsideItem { item: ItemId, position: Frame },
    #[error("state {state:?} is not available for item {item}")]
    UnsupportedState { item: ItemId, state: ClipState },
    #[error("history empty: {0}")]
    HistoryEmpty(&'static str),
    #[error(transparent)]
    BinRef(#[from] BinRefError),
}

/// Failure of a composite edit as seen by the host.
#[derive(Debug, Error)]
pub enum EditError {
    /// A step was refused; everything already applied has been reverted.
    #[error("edit rejected: {0}")]
    Rejected(#[from] TimelineError),
    /// Reverting or replaying recorded commands failed. The document is in an
    /// unknown state and must not be edited further.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl EditError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EditError::InvariantViolation(_))
    }
}

/// Completed edit call: either something changed (and was recorded) or the
/// request matched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOutcome {
    Applied,
    NoOp,
}

impl EditOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, EditOutcome::Applied)
    }
}

pub type Frame = i64; // time in frames, negatives allowed for offsets

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameRange {
    pub start: Frame,
    pub duration: Frame,
}

impl FrameRange {
    pub fn new(start: Frame, duration: Frame) -> Self {
        Self { start, duration }
    }
    pub fn end(&self) -> Frame {
        self.start + self.duration
    }
    pub fn overlaps(&self, other: &FrameRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Half-open `[start, end)` range used by lift/extract/insert/overwrite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Zone {
    pub start: Frame,
    pub end: Frame,
}

impl Zone {
    pub fn new(start: Frame, end: Frame) -> Self {
        Self { start, end }
    }

    pub fn width(&self) -> Frame {
        self.end - self.start
    }

    pub(crate) fn validate(&self) -> Result<(), TimelineError> {
        if self.end <= self.start {
            return Err(TimelineError::InvalidOp(format!(
                "empty zone [{}, {})",
                self.start, self.end
            )));
        }
        Ok(())
    }
}
