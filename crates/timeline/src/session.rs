use std::collections::BTreeMap;
use tracing::{debug, error};

use crate::{
    change_state, compose, copy_with_group, cut_group, extract_zone, insert_space, insert_zone,
    lift_zone, remove_space, shift_items, spacer_drag, spacer_release, spacer_select, split_audio,
    ClipState, EditError, EditHistory, EditOutcome, EditRequest, EditorConfig, Frame,
    HistoryEntry, HistorySink, ItemId, RenderInvalidation, SpacerSelection, Timeline, TimelineError, TrackId,
    Transaction, Zone,
};

/// An in-progress spacer drag, returned by [`EditSession::spacer_start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacerHandle {
    selection: SpacerSelection,
    origin: Frame,
}

impl SpacerHandle {
    /// Item whose position tracks the drag.
    pub fn representative(&self) -> ItemId {
        self.selection.representative
    }

    pub fn items(&self) -> &[ItemId] {
        &self.selection.items
    }

    /// Start of the representative when the drag began.
    pub fn origin(&self) -> Frame {
        self.origin
    }
}

/// Owns a timeline document and records every completed edit into `H`.
pub struct EditSession<H: HistorySink = EditHistory> {
    timeline: Timeline,
    history: H,
    config: EditorConfig,
    poisoned: Option<String>,
    invalidations: Vec<RenderInvalidation>,
}

impl EditSession<EditHistory> {
    pub fn new(timeline: Timeline, config: EditorConfig) -> Self {
        let history = EditHistory::with_depth(config.history_depth);
        Self::with_history(timeline, history, config)
    }
}

impl<H: HistorySink> EditSession<H> {
    pub fn with_history(timeline: Timeline, history: H, config: EditorConfig) -> Self {
        Self {
            timeline,
            history,
            config,
            poisoned: None,
            invalidations: Vec::new(),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// False once an invariant violation left the document in an unknown state.
    pub fn is_usable(&self) -> bool {
        self.poisoned.is_none()
    }

    /// Render ranges touched by the latest call that reached the document.
    pub fn last_invalidations(&self) -> &[RenderInvalidation] {
        &self.invalidations
    }

    /// Swaps in the refresh requests of the call that just ran, so the
    /// document queue never outlives one edit.
    fn settle(&mut self) {
        self.invalidations = self.timeline.take_invalidations();
        if !self.invalidations.is_empty() {
            debug!(count = self.invalidations.len(), "render ranges invalidated");
        }
    }

    fn ensure_usable(&self) -> Result<(), EditError> {
        match &self.poisoned {
            Some(reason) => Err(EditError::InvariantViolation(format!(
                "session halted after earlier failure: {reason}"
            ))),
            None => Ok(()),
        }
    }

    fn track_fatal<T>(&mut self, result: Result<T, EditError>) -> Result<T, EditError> {
        if let Err(err) = &result {
            if err.is_fatal() && self.poisoned.is_none() {
                error!(%err, "edit session halted");
                self.poisoned = Some(err.to_string());
            }
        }
        result
    }

    /// Runs `body` as one composite edit, recording it under `label` when it
    /// changed anything.
    fn run<T, F>(&mut self, label: &str, body: F) -> Result<(T, EditOutcome), EditError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, TimelineError>,
    {
        self.ensure_usable()?;
        let result = compose(&mut self.timeline, body);
        self.settle();
        let (value, edit) = self.track_fatal(result)?;
        if edit.is_empty() {
            debug!(label, "edit matched nothing");
            return Ok((value, EditOutcome::NoOp));
        }
        debug!(label, steps = edit.len(), "edit applied");
        self.history.record(HistoryEntry::new(label, edit));
        Ok((value, EditOutcome::Applied))
    }

    /// Runs `body` without recording it.
    fn run_untracked<T, F>(&mut self, body: F) -> Result<T, EditError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, TimelineError>,
    {
        self.ensure_usable()?;
        let result = compose(&mut self.timeline, body);
        self.settle();
        self.track_fatal(result).map(|(value, _)| value)
    }

    /// Cuts the clip's whole group at `position`. Nothing is recorded when no
    /// item straddles the position.
    pub fn cut_clip(&mut self, item_id: ItemId, position: Frame) -> Result<EditOutcome, EditError> {
        self.run("Cut clip", |tx| cut_group(tx, item_id, position))
            .map(|(_, outcome)| outcome)
    }

    /// Copies the clip's group so the clip's copy starts at `position` on
    /// `track_id`. Returns the source-to-copy mapping.
    pub fn copy_clip(
        &mut self,
        item_id: ItemId,
        track_id: TrackId,
        position: Frame,
    ) -> Result<BTreeMap<ItemId, ItemId>, EditError> {
        self.run("Copy clip", |tx| {
            copy_with_group(tx, item_id, track_id, position)
        })
        .map(|(mapping, _)| mapping)
    }

    pub fn split_audio(&mut self, item_id: ItemId) -> Result<EditOutcome, EditError> {
        let offset = self.config.split_audio_track_offset;
        self.run("Split Audio", |tx| split_audio(tx, item_id, offset))
            .map(|(_, outcome)| outcome)
    }

    pub fn change_state(
        &mut self,
        item_id: ItemId,
        state: ClipState,
    ) -> Result<EditOutcome, EditError> {
        self.run("Change clip state", |tx| change_state(tx, item_id, state))
            .map(|(_, outcome)| outcome)
    }

    pub fn insert_space(&mut self, position: Frame, width: Frame) -> Result<EditOutcome, EditError> {
        self.run("Insert space", |tx| insert_space(tx, position, width))
            .map(|(_, outcome)| outcome)
    }

    pub fn remove_space(&mut self, zone: Zone) -> Result<EditOutcome, EditError> {
        self.run("Remove space", |tx| remove_space(tx, zone))
            .map(|(_, outcome)| outcome)
    }

    pub fn lift_zone(&mut self, track_id: TrackId, zone: Zone) -> Result<EditOutcome, EditError> {
        self.run("Lift zone", |tx| lift_zone(tx, track_id, zone))
            .map(|(_, outcome)| outcome)
    }

    pub fn extract_zone(
        &mut self,
        track_ids: &[TrackId],
        zone: Zone,
        lift_only: bool,
    ) -> Result<EditOutcome, EditError> {
        let label = if lift_only { "Lift zone" } else { "Extract zone" };
        self.run(label, |tx| extract_zone(tx, track_ids, zone, lift_only))
            .map(|(_, outcome)| outcome)
    }

    /// Places `zone` of bin source `source_id` at `position`, returning the
    /// new item.
    pub fn insert_zone(
        &mut self,
        track_id: TrackId,
        source_id: &str,
        zone: Zone,
        position: Frame,
        overwrite: bool,
    ) -> Result<ItemId, EditError> {
        let label = if overwrite { "Overwrite zone" } else { "Insert zone" };
        self.run(label, |tx| {
            insert_zone(tx, track_id, source_id, zone, position, overwrite)
        })
        .map(|(item_id, _)| item_id)
    }

    /// Picks up everything after `position` on `track_id` for dragging.
    /// Returns `None` when there is nothing to drag.
    pub fn spacer_start(
        &mut self,
        track_id: TrackId,
        position: Frame,
    ) -> Result<Option<SpacerHandle>, EditError> {
        let selection = self.run_untracked(|tx| spacer_select(tx, track_id, position))?;
        let Some(selection) = selection else {
            debug!(position, "spacer selected nothing");
            return Ok(None);
        };
        let origin = self
            .timeline
            .require_item(selection.representative)?
            .position;
        Ok(Some(SpacerHandle { selection, origin }))
    }

    /// Interactive move of the spacer selection; not recorded.
    pub fn spacer_drag(&mut self, handle: &SpacerHandle, position: Frame) -> Result<(), EditError> {
        self.run_untracked(|tx| spacer_drag(tx, &handle.selection, position))
    }

    /// Drops the selection back where it started.
    pub fn spacer_cancel(&mut self, handle: SpacerHandle) -> Result<(), EditError> {
        self.run_untracked(|tx| spacer_release(tx, &handle.selection, handle.origin))
    }

    /// Finishes a spacer drag: the selection returns to `start` and is then
    /// shifted by `end - start` as one recorded edit.
    pub fn spacer_end(
        &mut self,
        handle: SpacerHandle,
        start: Frame,
        end: Frame,
    ) -> Result<EditOutcome, EditError> {
        self.run_untracked(|tx| spacer_release(tx, &handle.selection, start))?;
        let delta = end.checked_sub(start).ok_or_else(|| {
            TimelineError::InvalidOp(format!("spacer move {start} -> {end} out of range"))
        })?;
        let label = if delta < 0 { "Remove space" } else { "Insert space" };
        self.run(label, |tx| shift_items(tx, &handle.selection.items, delta))
            .map(|(_, outcome)| outcome)
    }

    pub fn apply_request(&mut self, request: &EditRequest) -> Result<EditOutcome, EditError> {
        match request {
            EditRequest::CutClip { item_id, position } => self.cut_clip(*item_id, *position),
            EditRequest::CopyClip {
                item_id,
                track_id,
                position,
            } => self
                .copy_clip(*item_id, *track_id, *position)
                .map(|_| EditOutcome::Applied),
            EditRequest::SplitAudio { item_id } => self.split_audio(*item_id),
            EditRequest::ChangeState { item_id, state } => self.change_state(*item_id, *state),
            EditRequest::InsertSpace { position, width } => self.insert_space(*position, *width),
            EditRequest::RemoveSpace { zone } => self.remove_space(*zone),
            EditRequest::ExtractZone {
                track_ids,
                zone,
                lift_only,
            } => self.extract_zone(track_ids, *zone, *lift_only),
            EditRequest::InsertZone {
                track_id,
                source_id,
                zone,
                position,
                overwrite,
            } => self
                .insert_zone(*track_id, source_id, *zone, *position, *overwrite)
                .map(|_| EditOutcome::Applied),
            EditRequest::Spacer {
                track_id,
                position,
                offset,
            } => {
                let Some(handle) = self.spacer_start(*track_id, *position)? else {
                    return Ok(EditOutcome::NoOp);
                };
                let start = handle.origin;
                let Some(end) = start.checked_add(*offset) else {
                    self.spacer_cancel(handle)?;
                    return Err(TimelineError::InvalidOp(format!(
                        "spacer offset {offset} out of range"
                    ))
                    .into());
                };
                if let Err(err) = self.spacer_drag(&handle, end) {
                    if !err.is_fatal() {
                        self.spacer_cancel(handle)?;
                    }
                    return Err(err);
                }
                self.spacer_end(handle, start, end)
            }
        }
    }

    pub fn undo(&mut self) -> Result<String, EditError> {
        self.ensure_usable()?;
        let result = self.history.undo(&mut self.timeline);
        self.settle();
        self.track_fatal(result)
    }

    pub fn redo(&mut self) -> Result<String, EditError> {
        self.ensure_usable()?;
        let result = self.history.redo(&mut self.timeline);
        self.settle();
        self.track_fatal(result)
    }

    /// Ends the session: history is cleared and the document handed back.
    pub fn close(mut self) -> Timeline {
        self.history.clear();
        self.timeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompositeEdit, MediaSource, TrackKind};

    #[derive(Default)]
    struct Recorder {
        labels: Vec<String>,
    }

    impl HistorySink for Recorder {
        fn record(&mut self, entry: HistoryEntry) {
            self.labels.push(entry.label);
        }

        fn undo(&mut self, _timeline: &mut Timeline) -> Result<String, EditError> {
            Err(TimelineError::HistoryEmpty("recorder cannot undo").into())
        }

        fn redo(&mut self, _timeline: &mut Timeline) -> Result<String, EditError> {
            Err(TimelineError::HistoryEmpty("recorder cannot redo").into())
        }

        fn clear(&mut self) {
            self.labels.clear();
        }
    }

    fn document() -> (Timeline, TrackId) {
        let mut timeline = Timeline::new("session");
        timeline.add_media(MediaSource::new("clip", 500));
        let track = timeline.add_track("V1", TrackKind::Video);
        (timeline, track)
    }

    #[test]
    fn only_applied_edits_are_recorded() {
        let (mut timeline, track) = document();
        let item = timeline.add_clip("clip", track, 0, 100).unwrap();
        let mut session =
            EditSession::with_history(timeline, Recorder::default(), EditorConfig::default());

        assert_eq!(session.cut_clip(item, 40).unwrap(), EditOutcome::Applied);
        assert_eq!(session.cut_clip(item, 90).unwrap(), EditOutcome::NoOp);
        assert!(session.cut_clip(ItemId::new(), 10).is_err());
        assert_eq!(
            session.change_state(item, ClipState::Disabled).unwrap(),
            EditOutcome::Applied
        );
        assert_eq!(session.history().labels, vec!["Cut clip", "Change clip state"]);

        let timeline = session.close();
        assert_eq!(timeline.item_count(), 2);
    }

    #[test]
    fn spacer_round_trip_records_one_entry() {
        let (mut timeline, track) = document();
        timeline.add_clip("clip", track, 0, 10).unwrap();
        let b = timeline.add_clip("clip", track, 20, 10).unwrap();
        let c = timeline.add_clip("clip", track, 40, 10).unwrap();
        let mut session = EditSession::new(timeline, EditorConfig::default());
        let before = session.timeline().snapshot();

        let handle = session.spacer_start(track, 10).unwrap().unwrap();
        assert_eq!(handle.representative(), b);
        assert_eq!(handle.origin(), 20);
        session.spacer_drag(&handle, 25).unwrap();
        session.spacer_drag(&handle, 32).unwrap();
        assert_eq!(session.history().undo_count(), 0);

        let outcome = session.spacer_end(handle, 20, 32).unwrap();
        assert_eq!(outcome, EditOutcome::Applied);
        assert_eq!(session.timeline().item(c).unwrap().position, 52);
        assert_eq!(session.timeline().groups().group_count(), 0);
        assert_eq!(session.history().undo_label(), Some("Insert space"));

        session.undo().unwrap();
        assert_eq!(session.timeline().snapshot(), before);
    }

    #[test]
    fn spacer_with_nothing_after_is_noop() {
        let (mut timeline, track) = document();
        timeline.add_clip("clip", track, 0, 10).unwrap();
        let mut session = EditSession::new(timeline, EditorConfig::default());
        assert!(session.spacer_start(track, 0).unwrap().is_none());

        let request = EditRequest::Spacer {
            track_id: track,
            position: 0,
            offset: 10,
        };
        assert_eq!(session.apply_request(&request).unwrap(), EditOutcome::NoOp);
    }

    #[test]
    fn blocked_spacer_request_restores_selection() {
        let (mut timeline, track) = document();
        timeline.add_clip("clip", track, 0, 10).unwrap();
        timeline.add_clip("clip", track, 20, 10).unwrap();
        timeline.add_clip("clip", track, 40, 10).unwrap();
        let mut session = EditSession::new(timeline, EditorConfig::default());
        let before = session.timeline().snapshot();

        let request = EditRequest::Spacer {
            track_id: track,
            position: 15,
            offset: -15,
        };
        assert!(session.apply_request(&request).is_err());
        assert_eq!(session.timeline().snapshot(), before);
        assert!(!session.history().can_undo());
    }

    #[test]
    fn spacer_offset_overflow_is_declined() {
        let (mut timeline, track) = document();
        timeline.add_clip("clip", track, 0, 10).unwrap();
        timeline.add_clip("clip", track, 20, 10).unwrap();
        timeline.add_clip("clip", track, 40, 10).unwrap();
        let mut session = EditSession::new(timeline, EditorConfig::default());
        let before = session.timeline().snapshot();

        let request = EditRequest::Spacer {
            track_id: track,
            position: 15,
            offset: Frame::MAX,
        };
        let err = session.apply_request(&request).unwrap_err();
        assert!(matches!(err, EditError::Rejected(TimelineError::InvalidOp(_))));
        assert_eq!(session.timeline().snapshot(), before);
        assert!(session.is_usable());
    }

    #[test]
    fn invalidations_cover_only_the_latest_call() {
        let (mut timeline, track) = document();
        let item = timeline.add_clip("clip", track, 0, 100).unwrap();
        let mut session = EditSession::new(timeline, EditorConfig::default());

        session.change_state(item, ClipState::VideoOnly).unwrap();
        assert_eq!(session.last_invalidations().len(), 1);
        assert_eq!(session.last_invalidations()[0].track_id, track);

        session.insert_space(200, 10).unwrap();
        assert!(session.last_invalidations().is_empty());

        session.undo().unwrap();
        assert_eq!(session.last_invalidations().len(), 1);
        assert_eq!(
            session.timeline().item(item).unwrap().state,
            ClipState::AudioVideo
        );
    }

    #[test]
    fn fatal_replay_halts_the_session() {
        let (mut timeline, track) = document();
        let item = timeline.add_clip("clip", track, 0, 100).unwrap();
        let mut history = EditHistory::new();
        // an entry that cannot apply to this document
        history.record(HistoryEntry::new(
            "stale",
            CompositeEdit {
                redo: Vec::new(),
                undo: vec![crate::TimelineCommand::DeleteItem {
                    item_id: ItemId::new(),
                }],
            },
        ));
        let mut session = EditSession::with_history(timeline, history, EditorConfig::default());

        let err = session.undo().unwrap_err();
        assert!(err.is_fatal());
        assert!(!session.is_usable());
        assert!(session.cut_clip(item, 50).unwrap_err().is_fatal());
    }
}
