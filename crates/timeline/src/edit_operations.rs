/// Composite timeline edits built from primitive commands.
///
/// Every function here runs inside a [`Transaction`] and returns an error as
/// soon as a step is refused; the caller's transaction then reverts whatever
/// was applied, so none of these leave partial edits behind.
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    copy_groups, group_members, move_group, remove_from_group, set_in_group_of, split, ungroup,
    BinClipRef, ClipState, Frame, GroupId, Item, ItemId, ItemKind, Member, TimelineCommand,
    TimelineError, TrackId, Transaction, Zone,
};

/// Creates an item for `bin_ref` at `position` on `track_id`.
pub fn insert_from_bin(
    tx: &mut Transaction<'_>,
    bin_ref: &BinClipRef,
    track_id: TrackId,
    position: Frame,
) -> Result<ItemId, TimelineError> {
    let media = tx
        .timeline()
        .media(&bin_ref.source_id)
        .ok_or_else(|| TimelineError::MediaNotFound(bin_ref.source_id.clone()))?;
    let mut item = Item::clip(
        bin_ref.source_id.clone(),
        bin_ref.length().unwrap_or(media.length),
    );
    item.in_point = bin_ref.in_point();
    item.track_id = Some(track_id);
    item.position = position;
    let item_id = item.id;
    tx.apply(TimelineCommand::CreateItem { item })?;
    Ok(item_id)
}

/// Creates an off-track copy of `source` presenting `state`, with the same
/// trim, speed and effect stack.
pub fn copy_item(
    tx: &mut Transaction<'_>,
    source: ItemId,
    state: ClipState,
) -> Result<ItemId, TimelineError> {
    let timeline = tx.timeline();
    let original = timeline.require_item(source)?.clone();
    let mut copy = match &original.kind {
        ItemKind::Clip { bin_id } => {
            let media = timeline
                .media(bin_id)
                .ok_or_else(|| TimelineError::MediaNotFound(bin_id.clone()))?;
            Item::clip(bin_id.clone(), media.length)
        }
        ItemKind::Composition { composition_id } => {
            Item::composition(composition_id.clone(), original.duration)
        }
    };
    copy.state = state;
    copy.speed = original.speed;
    copy.endless = original.endless;
    if original.endless || original.bin_id().is_none() {
        // no media end to trim against
        copy.in_point = original.in_point;
        copy.duration = original.duration;
    }
    let copy_id = copy.id;
    let initial_duration = copy.duration;
    tx.apply(TimelineCommand::CreateItem { item: copy })?;

    if initial_duration != original.duration {
        // trim the head first so the in-point matches, then the tail.
        // Bounded media keeps in_point + duration <= length, so the head
        // resize never drops below one frame.
        if original.in_point != 0 {
            tx.apply(TimelineCommand::ResizeItem {
                item_id: copy_id,
                duration: initial_duration - original.in_point,
                from_right: false,
            })?;
        }
        tx.apply(TimelineCommand::ResizeItem {
            item_id: copy_id,
            duration: original.duration,
            from_right: true,
        })?;
    }
    if !original.effects.is_empty() {
        tx.apply(TimelineCommand::SetEffects {
            item_id: copy_id,
            effects: original.effects,
        })?;
    }
    Ok(copy_id)
}

/// Cuts one item at `position`, which must lie strictly inside it. The item
/// keeps the head; the returned new item holds the tail.
pub fn cut_item(
    tx: &mut Transaction<'_>,
    item_id: ItemId,
    position: Frame,
) -> Result<ItemId, TimelineError> {
    let item = tx.timeline().require_item(item_id)?.clone();
    let track_id = item.track_id.ok_or(TimelineError::NotOnTrack(item_id))?;
    if !item.straddles(position) {
        return Err(TimelineError::PositionOutsideItem {
            item: item_id,
            position,
        });
    }

    let tail = copy_item(tx, item_id, item.state)?;
    let head_duration = position - item.position;
    tx.apply(TimelineCommand::ResizeItem {
        item_id,
        duration: head_duration,
        from_right: true,
    })?;
    tx.apply(TimelineCommand::ResizeItem {
        item_id: tail,
        duration: item.duration - head_duration,
        from_right: false,
    })?;
    tx.apply(TimelineCommand::MoveItem {
        item_id: tail,
        track_id: Some(track_id),
        position,
    })?;
    Ok(tail)
}

/// Cuts every item of `item_id`'s group that straddles `position`, then splits
/// the group into the parts before and after the cut. Returns how many items
/// were cut.
pub fn cut_group(
    tx: &mut Transaction<'_>,
    item_id: ItemId,
    position: Frame,
) -> Result<usize, TimelineError> {
    let timeline = tx.timeline();
    timeline.require_item(item_id)?;
    let root = timeline.root_of(item_id);
    let straddling: Vec<ItemId> = timeline
        .groups()
        .leaves(root)
        .into_iter()
        .filter(|id| {
            timeline
                .item(*id)
                .map_or(false, |i| i.track_id.is_some() && i.straddles(position))
        })
        .collect();

    for source in &straddling {
        let tail = cut_item(tx, *source, position)?;
        // the tail shares the source's lineage until the group is split below
        set_in_group_of(tx, tail, *source)?;
    }
    match root {
        Member::Group(group) if !straddling.is_empty() => {
            split(tx, group, move |timeline, id| {
                timeline.item(id).map_or(false, |i| i.position < position)
            })?;
        }
        _ => {}
    }
    Ok(straddling.len())
}

/// Switches an item to `state`. Returns false when it already presents it.
pub fn change_state(
    tx: &mut Transaction<'_>,
    item_id: ItemId,
    state: ClipState,
) -> Result<bool, TimelineError> {
    if tx.timeline().require_item(item_id)?.state == state {
        return Ok(false);
    }
    tx.apply(TimelineCommand::SetItemState { item_id, state })?;
    Ok(true)
}

/// For each clip in `item_id`'s group: the clip becomes video only and an
/// audio-only copy is placed `track_offset` tracks away at the same position,
/// grouped with it.
pub fn split_audio(
    tx: &mut Transaction<'_>,
    item_id: ItemId,
    track_offset: isize,
) -> Result<usize, TimelineError> {
    let elements = tx.timeline().group_elements(item_id);
    for source in &elements {
        let timeline = tx.timeline();
        let item = timeline.require_item(*source)?;
        if item.bin_id().is_none() {
            return Err(TimelineError::InvalidOp(format!(
                "item {source} has no media to split"
            )));
        }
        let position = item.position;
        let target = timeline.track_at(timeline.item_track_index(*source)? as isize + track_offset)?;

        change_state(tx, *source, ClipState::VideoOnly)?;
        let audio = copy_item(tx, *source, ClipState::AudioOnly)?;
        tx.apply(TimelineCommand::MoveItem {
            item_id: audio,
            track_id: Some(target),
            position,
        })?;
        if tx.timeline().is_in_group(*source) {
            set_in_group_of(tx, audio, *source)?;
        } else {
            group_members(tx, &[Member::Item(*source), Member::Item(audio)])?;
        }
    }
    Ok(elements.len())
}

/// Moves the top-level nodes of `items` by `delta` frames as one block.
/// Several nodes are wrapped in a temporary group for the move.
pub fn shift_items(
    tx: &mut Transaction<'_>,
    items: &[ItemId],
    delta: Frame,
) -> Result<bool, TimelineError> {
    if items.is_empty() || delta == 0 {
        return Ok(false);
    }
    let roots: Vec<Member> = items
        .iter()
        .map(|id| tx.timeline().root_of(*id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    match roots.as_slice() {
        [only] => move_group(tx, *only, 0, delta)?,
        _ => {
            let group = group_members(tx, &roots)?;
            move_group(tx, Member::Group(group), 0, delta)?;
            ungroup(tx, group)?;
        }
    }
    Ok(true)
}

/// Opens a gap of `width` frames at `position` on every track.
pub fn insert_space(
    tx: &mut Transaction<'_>,
    position: Frame,
    width: Frame,
) -> Result<bool, TimelineError> {
    if width <= 0 {
        return Err(TimelineError::InvalidOp(format!("invalid space width {width}")));
    }
    let items = tx.timeline().items_starting_in(None, position, None);
    shift_items(tx, &items, width)
}

/// Closes the gap `zone` on every track by pulling later items back.
pub fn remove_space(tx: &mut Transaction<'_>, zone: Zone) -> Result<bool, TimelineError> {
    zone.validate()?;
    let items = tx.timeline().items_starting_in(None, zone.end, None);
    shift_items(tx, &items, -zone.width())
}

/// Deletes an item, detaching it from its group first.
pub fn delete_item(tx: &mut Transaction<'_>, item_id: ItemId) -> Result<(), TimelineError> {
    tx.timeline().require_item(item_id)?;
    remove_from_group(tx, Member::Item(item_id))?;
    tx.apply(TimelineCommand::DeleteItem { item_id })
}

fn cut_at_if_straddled(
    tx: &mut Transaction<'_>,
    track_id: TrackId,
    position: Frame,
) -> Result<(), TimelineError> {
    let timeline = tx.timeline();
    let straddling = timeline
        .item_at(track_id, position)
        .filter(|id| timeline.item(*id).map_or(false, |i| i.straddles(position)));
    if let Some(item_id) = straddling {
        cut_item(tx, item_id, position)?;
    }
    Ok(())
}

/// Empties `zone` on one track without moving anything. Returns how many items
/// were removed.
pub fn lift_zone(
    tx: &mut Transaction<'_>,
    track_id: TrackId,
    zone: Zone,
) -> Result<usize, TimelineError> {
    zone.validate()?;
    if tx.timeline().track(track_id).is_none() {
        return Err(TimelineError::TrackNotFound(track_id));
    }
    cut_at_if_straddled(tx, track_id, zone.start)?;
    cut_at_if_straddled(tx, track_id, zone.end)?;

    let inside = tx
        .timeline()
        .items_starting_in(Some(track_id), zone.start, Some(zone.end));
    for item_id in &inside {
        delete_item(tx, *item_id)?;
    }
    Ok(inside.len())
}

/// Lifts `zone` on every track in `tracks`; unless `lift_only`, the gap is then
/// closed across the timeline.
pub fn extract_zone(
    tx: &mut Transaction<'_>,
    tracks: &[TrackId],
    zone: Zone,
    lift_only: bool,
) -> Result<(), TimelineError> {
    zone.validate()?;
    if tracks.is_empty() {
        return Ok(());
    }
    for track_id in tracks {
        lift_zone(tx, *track_id, zone)?;
    }
    if !lift_only {
        remove_space(tx, zone)?;
    }
    Ok(())
}

/// Places `zone` of media `source_id` at `position` on `track_id`, either
/// overwriting what is there or rippling later items out of the way.
pub fn insert_zone(
    tx: &mut Transaction<'_>,
    track_id: TrackId,
    source_id: &str,
    zone: Zone,
    position: Frame,
    overwrite: bool,
) -> Result<ItemId, TimelineError> {
    zone.validate()?;
    let bin_ref = BinClipRef::zone(source_id, zone)?;
    let width = zone.width();
    if overwrite {
        let end = position
            .checked_add(width)
            .ok_or_else(|| TimelineError::InvalidOp(format!("zone at {position} out of range")))?;
        lift_zone(tx, track_id, Zone::new(position, end))?;
    } else {
        cut_at_if_straddled(tx, track_id, position)?;
        insert_space(tx, position, width)?;
    }
    insert_from_bin(tx, &bin_ref, track_id, position)
}

/// Copies `item_id`'s whole group so that `item_id`'s copy lands at
/// `position` on `track_id`; the other copies keep their relative offsets.
/// Returns the source-to-copy mapping.
pub fn copy_with_group(
    tx: &mut Transaction<'_>,
    item_id: ItemId,
    track_id: TrackId,
    position: Frame,
) -> Result<BTreeMap<ItemId, ItemId>, TimelineError> {
    let timeline = tx.timeline();
    let source = timeline.require_item(item_id)?;
    let target_index = timeline
        .track_index(track_id)
        .ok_or(TimelineError::TrackNotFound(track_id))?;
    let track_delta = target_index as isize - timeline.item_track_index(item_id)? as isize;
    let frame_delta = position - source.position;

    let mut mapping = BTreeMap::new();
    for id in timeline.group_elements(item_id) {
        let timeline = tx.timeline();
        let item = timeline.require_item(id)?;
        let (state, destination) = (item.state, item.position + frame_delta);
        let target = timeline.track_at(timeline.item_track_index(id)? as isize + track_delta)?;

        let copy = copy_item(tx, id, state)?;
        tx.apply(TimelineCommand::MoveItem {
            item_id: copy,
            track_id: Some(target),
            position: destination,
        })?;
        mapping.insert(id, copy);
    }
    copy_groups(tx, &mapping)?;
    Ok(mapping)
}

/// Items picked up by the spacer tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacerSelection {
    pub representative: ItemId,
    pub items: Vec<ItemId>,
    /// Group wrapping the selection while it is dragged, when it has more than
    /// one top-level node.
    pub transient_group: Option<GroupId>,
}

impl SpacerSelection {
    fn unit(&self, tx: &Transaction<'_>) -> Member {
        match self.transient_group {
            Some(group) => Member::Group(group),
            None => tx.timeline().root_of(self.representative),
        }
    }
}

/// Selects every item starting strictly after `position` on `track_id` and
/// binds them into one draggable unit.
pub fn spacer_select(
    tx: &mut Transaction<'_>,
    track_id: TrackId,
    position: Frame,
) -> Result<Option<SpacerSelection>, TimelineError> {
    if tx.timeline().track(track_id).is_none() {
        return Err(TimelineError::TrackNotFound(track_id));
    }
    let after = position.checked_add(1).ok_or_else(|| {
        TimelineError::InvalidOp(format!("spacer position {position} out of range"))
    })?;
    let items = tx.timeline().items_starting_in(Some(track_id), after, None);
    let Some(representative) = items.first().copied() else {
        return Ok(None);
    };
    let roots: BTreeSet<Member> = items.iter().map(|id| tx.timeline().root_of(*id)).collect();
    let transient_group = if roots.len() > 1 {
        let roots: Vec<Member> = roots.into_iter().collect();
        Some(group_members(tx, &roots)?)
    } else {
        None
    };
    Ok(Some(SpacerSelection {
        representative,
        items,
        transient_group,
    }))
}

/// Moves the selection so its representative starts at `position`.
pub fn spacer_drag(
    tx: &mut Transaction<'_>,
    selection: &SpacerSelection,
    position: Frame,
) -> Result<(), TimelineError> {
    let current = tx.timeline().require_item(selection.representative)?.position;
    if current == position {
        return Ok(());
    }
    let unit = selection.unit(tx);
    move_group(tx, unit, 0, position - current)
}

/// Puts the selection back at `start` and dissolves the transient group.
pub fn spacer_release(
    tx: &mut Transaction<'_>,
    selection: &SpacerSelection,
    start: Frame,
) -> Result<(), TimelineError> {
    spacer_drag(tx, selection, start)?;
    if let Some(group) = selection.transient_group {
        ungroup(tx, group)?;
    }
    Ok(())
}
