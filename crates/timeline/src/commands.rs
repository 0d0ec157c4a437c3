use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{
    ClipState, EffectInstance, Frame, FrameRange, GroupId, Item, ItemId, ItemKind, Member,
    RenderInvalidation, Timeline, TimelineError, TrackId,
};

/// Target placement of one item in a multi-item move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemPlacement {
    pub item_id: ItemId,
    pub track_id: Option<TrackId>,
    pub position: Frame,
}

/// Primitive, self-contained mutation of a [`Timeline`].
///
/// Every command carries the values it needs; applying it returns the command
/// that reverses it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TimelineCommand {
    CreateItem {
        item: Item,
    },
    DeleteItem {
        item_id: ItemId,
    },
    ResizeItem {
        item_id: ItemId,
        duration: Frame,
        /// Keep the start and move the end; otherwise keep the end and move
        /// the start (and the in-point with it).
        from_right: bool,
    },
    MoveItem {
        item_id: ItemId,
        track_id: Option<TrackId>,
        position: Frame,
    },
    MoveItems {
        moves: Vec<ItemPlacement>,
    },
    SetItemState {
        item_id: ItemId,
        state: ClipState,
    },
    SetEffects {
        item_id: ItemId,
        effects: Vec<EffectInstance>,
    },
    CreateGroup {
        group_id: GroupId,
    },
    DestroyGroup {
        group_id: GroupId,
    },
    SetParent {
        member: Member,
        parent: Option<GroupId>,
    },
}

impl TimelineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TimelineCommand::CreateItem { .. } => "create_item",
            TimelineCommand::DeleteItem { .. } => "delete_item",
            TimelineCommand::ResizeItem { .. } => "resize_item",
            TimelineCommand::MoveItem { .. } => "move_item",
            TimelineCommand::MoveItems { .. } => "move_items",
            TimelineCommand::SetItemState { .. } => "set_item_state",
            TimelineCommand::SetEffects { .. } => "set_effects",
            TimelineCommand::CreateGroup { .. } => "create_group",
            TimelineCommand::DestroyGroup { .. } => "destroy_group",
            TimelineCommand::SetParent { .. } => "set_parent",
        }
    }
}

/// Applies `command` and returns its inverse. A rejected command leaves the
/// timeline untouched.
pub fn apply_command(
    timeline: &mut Timeline,
    command: TimelineCommand,
) -> Result<TimelineCommand, TimelineError> {
    tracing::trace!(command = command.name(), "applying timeline command");
    match command {
        TimelineCommand::CreateItem { item } => create_item(timeline, item),
        TimelineCommand::DeleteItem { item_id } => delete_item(timeline, item_id),
        TimelineCommand::ResizeItem {
            item_id,
            duration,
            from_right,
        } => resize_item(timeline, item_id, duration, from_right),
        TimelineCommand::MoveItem {
            item_id,
            track_id,
            position,
        } => move_item(timeline, item_id, track_id, position),
        TimelineCommand::MoveItems { moves } => move_items(timeline, moves),
        TimelineCommand::SetItemState { item_id, state } => set_state(timeline, item_id, state),
        TimelineCommand::SetEffects { item_id, effects } => set_effects(timeline, item_id, effects),
        TimelineCommand::CreateGroup { group_id } => create_group(timeline, group_id),
        TimelineCommand::DestroyGroup { group_id } => destroy_group(timeline, group_id),
        TimelineCommand::SetParent { member, parent } => set_parent(timeline, member, parent),
    }
}

fn create_item(timeline: &mut Timeline, item: Item) -> Result<TimelineCommand, TimelineError> {
    if timeline.items.contains_key(&item.id) {
        return Err(TimelineError::ItemExists(item.id));
    }
    if item.duration <= 0 {
        return Err(TimelineError::InvalidDuration(item.duration));
    }
    if let ItemKind::Clip { bin_id } = &item.kind {
        let media = timeline
            .media(bin_id)
            .ok_or_else(|| TimelineError::MediaNotFound(bin_id.clone()))?;
        if !media.supports(item.state) {
            return Err(TimelineError::UnsupportedState {
                item: item.id,
                state: item.state,
            });
        }
    }
    validate_media_bounds(timeline, &item, item.in_point, item.duration)?;
    if let Some(track_id) = item.track_id {
        validate_slot(timeline, item.id, track_id, item.range(), &BTreeSet::new())?;
    }

    let item_id = item.id;
    let track_id = item.track_id;
    timeline.items.insert(item_id, item);
    if let Some(track_id) = track_id {
        attach(timeline, item_id, track_id);
    }
    Ok(TimelineCommand::DeleteItem { item_id })
}

fn delete_item(timeline: &mut Timeline, item_id: ItemId) -> Result<TimelineCommand, TimelineError> {
    if timeline.groups.parent(Member::Item(item_id)).is_some() {
        return Err(TimelineError::ItemGrouped(item_id));
    }
    let item = timeline
        .items
        .remove(&item_id)
        .ok_or(TimelineError::ItemNotFound(item_id))?;
    if let Some(track_id) = item.track_id {
        detach(timeline, item_id, track_id);
    }
    Ok(TimelineCommand::CreateItem { item })
}

fn resize_item(
    timeline: &mut Timeline,
    item_id: ItemId,
    duration: Frame,
    from_right: bool,
) -> Result<TimelineCommand, TimelineError> {
    if duration <= 0 {
        return Err(TimelineError::InvalidDuration(duration));
    }
    let item = timeline.require_item(item_id)?;
    let old_duration = item.duration;
    let (position, in_point) = if from_right {
        (item.position, item.in_point)
    } else {
        let shift = old_duration - duration;
        (item.position + shift, item.in_point + shift)
    };
    validate_media_bounds(timeline, item, in_point, duration)?;
    if let Some(track_id) = item.track_id {
        validate_slot(
            timeline,
            item_id,
            track_id,
            FrameRange::new(position, duration),
            &BTreeSet::from([item_id]),
        )?;
    }

    let item = timeline
        .items
        .get_mut(&item_id)
        .ok_or(TimelineError::ItemNotFound(item_id))?;
    item.position = position;
    item.in_point = in_point;
    item.duration = duration;
    Ok(TimelineCommand::ResizeItem {
        item_id,
        duration: old_duration,
        from_right,
    })
}

fn move_item(
    timeline: &mut Timeline,
    item_id: ItemId,
    track_id: Option<TrackId>,
    position: Frame,
) -> Result<TimelineCommand, TimelineError> {
    let previous = relocate(
        timeline,
        &[ItemPlacement {
            item_id,
            track_id,
            position,
        }],
    )?;
    let ItemPlacement {
        track_id, position, ..
    } = previous[0];
    Ok(TimelineCommand::MoveItem {
        item_id,
        track_id,
        position,
    })
}

fn move_items(
    timeline: &mut Timeline,
    moves: Vec<ItemPlacement>,
) -> Result<TimelineCommand, TimelineError> {
    let previous = relocate(timeline, &moves)?;
    Ok(TimelineCommand::MoveItems { moves: previous })
}

/// Moves all items at once and returns their previous placements.
fn relocate(
    timeline: &mut Timeline,
    moves: &[ItemPlacement],
) -> Result<Vec<ItemPlacement>, TimelineError> {
    let moving: BTreeSet<ItemId> = moves.iter().map(|m| m.item_id).collect();
    if moving.len() != moves.len() {
        return Err(TimelineError::InvalidOp(
            "item listed twice in one move".to_string(),
        ));
    }

    let mut previous = Vec::with_capacity(moves.len());
    for placement in moves {
        let item = timeline.require_item(placement.item_id)?;
        previous.push(ItemPlacement {
            item_id: item.id,
            track_id: item.track_id,
            position: item.position,
        });
        if let Some(track_id) = placement.track_id {
            let range = FrameRange::new(placement.position, item.duration);
            validate_slot(timeline, item.id, track_id, range, &moving)?;
        }
    }
    // moving items must not collide with each other either
    for (i, a) in moves.iter().enumerate() {
        for b in &moves[i + 1..] {
            let Some(track) = a.track_id else { continue };
            if b.track_id != Some(track) {
                continue;
            }
            let a_range = FrameRange::new(a.position, timeline.items[&a.item_id].duration);
            let b_range = FrameRange::new(b.position, timeline.items[&b.item_id].duration);
            if a_range.overlaps(&b_range) {
                return Err(TimelineError::Overlap {
                    item: a.item_id,
                    other: b.item_id,
                    track,
                });
            }
        }
    }

    for placement in &previous {
        if let Some(track_id) = placement.track_id {
            detach(timeline, placement.item_id, track_id);
        }
    }
    for placement in moves {
        if let Some(item) = timeline.items.get_mut(&placement.item_id) {
            item.track_id = placement.track_id;
            item.position = placement.position;
        }
        if let Some(track_id) = placement.track_id {
            attach(timeline, placement.item_id, track_id);
        }
    }
    Ok(previous)
}

fn set_state(
    timeline: &mut Timeline,
    item_id: ItemId,
    state: ClipState,
) -> Result<TimelineCommand, TimelineError> {
    let item = timeline.require_item(item_id)?;
    if let Some(bin_id) = item.bin_id() {
        let media = timeline
            .media(bin_id)
            .ok_or_else(|| TimelineError::MediaNotFound(bin_id.to_string()))?;
        if !media.supports(state) {
            return Err(TimelineError::UnsupportedState {
                item: item_id,
                state,
            });
        }
    }
    let item = timeline
        .items
        .get_mut(&item_id)
        .ok_or(TimelineError::ItemNotFound(item_id))?;
    let previous = std::mem::replace(&mut item.state, state);
    let placed = item.track_id.map(|track_id| (track_id, item.range()));

    // The track has to re-plant the item for the new state to take effect.
    if let Some((track_id, range)) = placed {
        *timeline.refresh.replugs.entry(track_id).or_default() += 1;
        timeline
            .refresh
            .invalidations
            .push(RenderInvalidation { track_id, range });
    }
    Ok(TimelineCommand::SetItemState {
        item_id,
        state: previous,
    })
}

fn set_effects(
    timeline: &mut Timeline,
    item_id: ItemId,
    effects: Vec<EffectInstance>,
) -> Result<TimelineCommand, TimelineError> {
    let item = timeline
        .items
        .get_mut(&item_id)
        .ok_or(TimelineError::ItemNotFound(item_id))?;
    let previous = std::mem::replace(&mut item.effects, effects);
    Ok(TimelineCommand::SetEffects {
        item_id,
        effects: previous,
    })
}

fn create_group(
    timeline: &mut Timeline,
    group_id: GroupId,
) -> Result<TimelineCommand, TimelineError> {
    if timeline.groups.contains(group_id) {
        return Err(TimelineError::GroupExists(group_id));
    }
    timeline.groups.insert_group(group_id);
    Ok(TimelineCommand::DestroyGroup { group_id })
}

fn destroy_group(
    timeline: &mut Timeline,
    group_id: GroupId,
) -> Result<TimelineCommand, TimelineError> {
    let children = timeline
        .groups
        .children(group_id)
        .ok_or(TimelineError::GroupNotFound(group_id))?;
    if !children.is_empty() || timeline.groups.parent(Member::Group(group_id)).is_some() {
        return Err(TimelineError::GroupNotEmpty(group_id));
    }
    timeline.groups.remove_group(group_id);
    Ok(TimelineCommand::CreateGroup { group_id })
}

fn set_parent(
    timeline: &mut Timeline,
    member: Member,
    parent: Option<GroupId>,
) -> Result<TimelineCommand, TimelineError> {
    match member {
        Member::Item(id) => {
            timeline.require_item(id)?;
        }
        Member::Group(id) => {
            if !timeline.groups.contains(id) {
                return Err(TimelineError::GroupNotFound(id));
            }
        }
    }
    if let Some(parent) = parent {
        if !timeline.groups.contains(parent) {
            return Err(TimelineError::GroupNotFound(parent));
        }
        if let Member::Group(group) = member {
            if timeline.groups.is_descendant(Member::Group(parent), group) {
                return Err(TimelineError::GroupCycle { group, parent });
            }
        }
    }
    let previous = timeline.groups.set_parent(member, parent);
    Ok(TimelineCommand::SetParent {
        member,
        parent: previous,
    })
}

fn validate_media_bounds(
    timeline: &Timeline,
    item: &Item,
    in_point: Frame,
    duration: Frame,
) -> Result<(), TimelineError> {
    if item.endless {
        return Ok(());
    }
    let Some(bin_id) = item.bin_id() else {
        return Ok(());
    };
    let media = timeline
        .media(bin_id)
        .ok_or_else(|| TimelineError::MediaNotFound(bin_id.to_string()))?;
    if in_point < 0 || in_point + duration > media.length {
        return Err(TimelineError::OutOfMediaBounds(item.id));
    }
    Ok(())
}

fn validate_slot(
    timeline: &Timeline,
    item_id: ItemId,
    track_id: TrackId,
    range: FrameRange,
    ignore: &BTreeSet<ItemId>,
) -> Result<(), TimelineError> {
    if timeline.track(track_id).is_none() {
        return Err(TimelineError::TrackNotFound(track_id));
    }
    if range.start < 0 {
        return Err(TimelineError::InvalidOp(format!(
            "item {item_id} would start before frame 0"
        )));
    }
    match timeline.find_overlap(track_id, range, ignore) {
        Some(other) => Err(TimelineError::Overlap {
            item: item_id,
            other,
            track: track_id,
        }),
        None => Ok(()),
    }
}

fn attach(timeline: &mut Timeline, item_id: ItemId, track_id: TrackId) {
    let position = timeline.items.get(&item_id).map(|i| i.position);
    let Some(position) = position else {
        return;
    };
    let items = &timeline.items;
    if let Some(track) = timeline.tracks.iter_mut().find(|t| t.id == track_id) {
        let idx = track
            .item_ids
            .iter()
            .position(|id| items.get(id).map_or(false, |i| i.position > position))
            .unwrap_or(track.item_ids.len());
        track.item_ids.insert(idx, item_id);
    }
}

fn detach(timeline: &mut Timeline, item_id: ItemId, track_id: TrackId) {
    if let Some(track) = timeline.tracks.iter_mut().find(|t| t.id == track_id) {
        track.item_ids.retain(|id| *id != item_id);
    }
}
