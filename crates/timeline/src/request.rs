use serde::{Deserialize, Serialize};

use crate::{ClipState, Frame, ItemId, TrackId, Zone};

/// A user-level edit as a host would send it, e.g. from a script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditRequest {
    CutClip {
        item_id: ItemId,
        position: Frame,
    },
    CopyClip {
        item_id: ItemId,
        track_id: TrackId,
        position: Frame,
    },
    SplitAudio {
        item_id: ItemId,
    },
    ChangeState {
        item_id: ItemId,
        state: ClipState,
    },
    InsertSpace {
        position: Frame,
        width: Frame,
    },
    RemoveSpace {
        zone: Zone,
    },
    /// Lift on every listed track, then close the gap unless `lift_only`.
    ExtractZone {
        track_ids: Vec<TrackId>,
        zone: Zone,
        #[serde(default)]
        lift_only: bool,
    },
    InsertZone {
        track_id: TrackId,
        source_id: String,
        zone: Zone,
        position: Frame,
        #[serde(default)]
        overwrite: bool,
    },
    /// Spacer drag from `position` by `offset` frames, start to end in one go.
    Spacer {
        track_id: TrackId,
        position: Frame,
        offset: Frame,
    },
}

impl EditRequest {
    pub fn name(&self) -> &'static str {
        match self {
            EditRequest::CutClip { .. } => "cut_clip",
            EditRequest::CopyClip { .. } => "copy_clip",
            EditRequest::SplitAudio { .. } => "split_audio",
            EditRequest::ChangeState { .. } => "change_state",
            EditRequest::InsertSpace { .. } => "insert_space",
            EditRequest::RemoveSpace { .. } => "remove_space",
            EditRequest::ExtractZone { .. } => "extract_zone",
            EditRequest::InsertZone { .. } => "insert_zone",
            EditRequest::Spacer { .. } => "spacer",
        }
    }
}
