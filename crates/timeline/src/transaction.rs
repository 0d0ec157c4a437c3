use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{apply_command, EditError, Timeline, TimelineCommand, TimelineError};

/// The recorded result of a successful composite edit.
///
/// `redo` holds the commands in the order they were applied; `undo` holds
/// their inverses already in reverse order, so both lists replay front to back.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompositeEdit {
    pub redo: Vec<TimelineCommand>,
    pub undo: Vec<TimelineCommand>,
}

impl CompositeEdit {
    pub fn is_empty(&self) -> bool {
        self.redo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.redo.len()
    }

    pub fn undo(&self, timeline: &mut Timeline) -> Result<(), EditError> {
        replay(timeline, &self.undo, "undo")
    }

    pub fn redo(&self, timeline: &mut Timeline) -> Result<(), EditError> {
        replay(timeline, &self.redo, "redo")
    }
}

fn replay(
    timeline: &mut Timeline,
    commands: &[TimelineCommand],
    direction: &str,
) -> Result<(), EditError> {
    for (step, command) in commands.iter().enumerate() {
        if let Err(err) = apply_command(timeline, command.clone()) {
            error!(direction, step, command = command.name(), %err, "replay failed");
            return Err(EditError::InvariantViolation(format!(
                "{direction} step {step} ({}) failed: {err}",
                command.name()
            )));
        }
    }
    Ok(())
}

/// Accumulates applied commands and their inverses for one composite edit.
pub struct Transaction<'a> {
    timeline: &'a mut Timeline,
    redo: Vec<TimelineCommand>,
    undo: Vec<TimelineCommand>,
}

impl<'a> Transaction<'a> {
    pub fn new(timeline: &'a mut Timeline) -> Self {
        Self {
            timeline,
            redo: Vec::new(),
            undo: Vec::new(),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &*self.timeline
    }

    /// Applies one step. On failure nothing from this step is visible and the
    /// earlier steps stay applied until the transaction is rolled back.
    pub fn apply(&mut self, command: TimelineCommand) -> Result<(), TimelineError> {
        let inverse = apply_command(self.timeline, command.clone())?;
        self.redo.push(command);
        self.undo.push(inverse);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.redo.is_empty()
    }

    /// Reverts every applied step, newest first.
    pub fn rollback(mut self) -> Result<(), EditError> {
        self.undo.reverse();
        replay(self.timeline, &self.undo, "rollback")
    }

    pub fn commit(mut self) -> CompositeEdit {
        self.undo.reverse();
        CompositeEdit {
            redo: self.redo,
            undo: self.undo,
        }
    }
}

/// Runs `body` as one all-or-nothing edit.
///
/// When `body` fails the steps it applied are reverted and the step error is
/// returned as [`EditError::Rejected`]. A failing revert yields
/// [`EditError::InvariantViolation`].
pub fn compose<T, F>(timeline: &mut Timeline, body: F) -> Result<(T, CompositeEdit), EditError>
where
    F: FnOnce(&mut Transaction<'_>) -> Result<T, TimelineError>,
{
    let mut tx = Transaction::new(timeline);
    match body(&mut tx) {
        Ok(value) => Ok((value, tx.commit())),
        Err(err) => {
            warn!(steps = tx.redo.len(), %err, "rolling back composite edit");
            tx.rollback()?;
            Err(EditError::Rejected(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ItemId, MediaSource, TrackId, TrackKind};

    fn setup() -> (Timeline, TrackId, ItemId) {
        let mut timeline = Timeline::new("tx");
        timeline.add_media(MediaSource::new("m", 300));
        let track = timeline.add_track("V1", TrackKind::Video);
        let item = timeline.add_clip("m", track, 0, 100).unwrap();
        (timeline, track, item)
    }

    #[test]
    fn failing_step_rolls_back_earlier_steps() {
        let (mut timeline, track, item) = setup();
        let before = timeline.snapshot();

        let result = compose(&mut timeline, |tx| {
            tx.apply(TimelineCommand::MoveItem {
                item_id: item,
                track_id: Some(track),
                position: 10,
            })?;
            tx.apply(TimelineCommand::ResizeItem {
                item_id: item,
                duration: 50,
                from_right: true,
            })?;
            tx.apply(TimelineCommand::ResizeItem {
                item_id: item,
                duration: -1,
                from_right: true,
            })
        });

        let err = result.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(
            err,
            EditError::Rejected(TimelineError::InvalidDuration(-1))
        ));
        assert_eq!(timeline.snapshot(), before);
    }

    #[test]
    fn undo_runs_in_reverse_and_redo_forward() {
        let (mut timeline, track, item) = setup();
        let before = timeline.snapshot();

        let ((), edit) = compose(&mut timeline, |tx| {
            tx.apply(TimelineCommand::ResizeItem {
                item_id: item,
                duration: 40,
                from_right: false,
            })?;
            tx.apply(TimelineCommand::MoveItem {
                item_id: item,
                track_id: Some(track),
                position: 200,
            })
        })
        .unwrap();
        let after = timeline.snapshot();
        assert_eq!(edit.len(), 2);

        for _ in 0..2 {
            edit.undo(&mut timeline).unwrap();
            assert_eq!(timeline.snapshot(), before);
            edit.redo(&mut timeline).unwrap();
            assert_eq!(timeline.snapshot(), after);
        }
    }

    #[test]
    fn replay_against_diverged_document_is_fatal() {
        let (mut timeline, track, item) = setup();
        let ((), edit) = compose(&mut timeline, |tx| {
            tx.apply(TimelineCommand::MoveItem {
                item_id: item,
                track_id: Some(track),
                position: 150,
            })
        })
        .unwrap();
        // something else now occupies the original slot
        timeline.add_clip("m", track, 0, 100).unwrap();

        let err = edit.undo(&mut timeline).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn composite_edit_serializes() {
        let (mut timeline, track, item) = setup();
        let ((), edit) = compose(&mut timeline, |tx| {
            tx.apply(TimelineCommand::MoveItem {
                item_id: item,
                track_id: Some(track),
                position: 120,
            })
        })
        .unwrap();
        let json = serde_json::to_string(&edit).unwrap();
        let decoded: CompositeEdit = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, edit);
    }
}
