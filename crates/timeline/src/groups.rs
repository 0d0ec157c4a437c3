//! Group hierarchy: a forest whose leaves are items and whose inner nodes are
//! groups. Every mutation here goes through [`TimelineCommand`]s applied on a
//! [`Transaction`], so group edits roll back and replay with everything else.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    Frame, GroupId, ItemId, ItemPlacement, Timeline, TimelineCommand, TimelineError, Transaction,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Member {
    Item(ItemId),
    Group(GroupId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTree {
    children: BTreeMap<GroupId, BTreeSet<Member>>,
    parents: BTreeMap<Member, GroupId>,
}

/// Serialized form: only the downward links, the upward index is rebuilt.
#[derive(Serialize, Deserialize)]
struct GroupTreeData {
    groups: BTreeMap<GroupId, BTreeSet<Member>>,
}

impl From<GroupTreeData> for GroupTree {
    fn from(data: GroupTreeData) -> Self {
        let mut parents = BTreeMap::new();
        for (group, members) in &data.groups {
            for member in members {
                parents.insert(*member, *group);
            }
        }
        Self {
            children: data.groups,
            parents,
        }
    }
}

impl Serialize for GroupTree {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GroupTreeData {
            groups: self.children.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GroupTree {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        GroupTreeData::deserialize(deserializer).map(GroupTree::from)
    }
}

impl GroupTree {
    pub fn contains(&self, group: GroupId) -> bool {
        self.children.contains_key(&group)
    }

    pub fn group_count(&self) -> usize {
        self.children.len()
    }

    pub fn parent(&self, member: Member) -> Option<GroupId> {
        self.parents.get(&member).copied()
    }

    pub fn children(&self, group: GroupId) -> Option<&BTreeSet<Member>> {
        self.children.get(&group)
    }

    /// Top-level node of the subtree `member` belongs to (itself when ungrouped).
    pub fn root(&self, member: Member) -> Member {
        let mut current = member;
        while let Some(parent) = self.parent(current) {
            current = Member::Group(parent);
        }
        current
    }

    /// Items under `member` (the item itself for an item).
    pub fn leaves(&self, member: Member) -> BTreeSet<ItemId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![member];
        while let Some(node) = stack.pop() {
            match node {
                Member::Item(id) => {
                    out.insert(id);
                }
                Member::Group(group) => {
                    if let Some(children) = self.children.get(&group) {
                        stack.extend(children.iter().copied());
                    }
                }
            }
        }
        out
    }

    /// True when `member` is `ancestor` or lies below it.
    pub fn is_descendant(&self, member: Member, ancestor: GroupId) -> bool {
        let mut current = member;
        loop {
            if current == Member::Group(ancestor) {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = Member::Group(parent),
                None => return false,
            }
        }
    }

    /// Top-level groups, in id order.
    pub fn roots(&self) -> Vec<GroupId> {
        self.children
            .keys()
            .filter(|g| !self.parents.contains_key(&Member::Group(**g)))
            .copied()
            .collect()
    }

    pub(crate) fn insert_group(&mut self, group: GroupId) {
        self.children.entry(group).or_default();
    }

    pub(crate) fn remove_group(&mut self, group: GroupId) {
        self.children.remove(&group);
    }

    /// Relinks `member` and returns its previous parent.
    pub(crate) fn set_parent(&mut self, member: Member, parent: Option<GroupId>) -> Option<GroupId> {
        let previous = self.parents.remove(&member);
        if let Some(old) = previous {
            if let Some(siblings) = self.children.get_mut(&old) {
                siblings.remove(&member);
            }
        }
        if let Some(new) = parent {
            self.parents.insert(member, new);
            self.children.entry(new).or_default().insert(member);
        }
        previous
    }
}

fn set_parent(
    tx: &mut Transaction<'_>,
    member: Member,
    parent: Option<GroupId>,
) -> Result<(), TimelineError> {
    if tx.timeline().groups().parent(member) == parent {
        return Ok(());
    }
    tx.apply(TimelineCommand::SetParent { member, parent })
}

fn new_group(tx: &mut Transaction<'_>, members: &[Member]) -> Result<GroupId, TimelineError> {
    let group_id = GroupId::new();
    tx.apply(TimelineCommand::CreateGroup { group_id })?;
    for member in members {
        set_parent(tx, *member, Some(group_id))?;
    }
    Ok(group_id)
}

/// Groups the top-level nodes of `members` under a new group.
pub fn group_members(
    tx: &mut Transaction<'_>,
    members: &[Member],
) -> Result<GroupId, TimelineError> {
    let roots: BTreeSet<Member> = members
        .iter()
        .map(|m| tx.timeline().groups().root(*m))
        .collect();
    if roots.len() < 2 {
        return Err(TimelineError::InvalidOp(
            "grouping needs at least two independent members".to_string(),
        ));
    }
    let roots: Vec<Member> = roots.into_iter().collect();
    new_group(tx, &roots)
}

/// Dissolves `group`; its children move up to the group's parent.
pub fn ungroup(tx: &mut Transaction<'_>, group: GroupId) -> Result<(), TimelineError> {
    let groups = tx.timeline().groups();
    let children: Vec<Member> = groups
        .children(group)
        .ok_or(TimelineError::GroupNotFound(group))?
        .iter()
        .copied()
        .collect();
    let parent = groups.parent(Member::Group(group));
    for child in children {
        set_parent(tx, child, parent)?;
    }
    set_parent(tx, Member::Group(group), None)?;
    tx.apply(TimelineCommand::DestroyGroup { group_id: group })
}

/// Detaches `member` from its group. A group left with a single child is
/// replaced by that child; an emptied group is removed.
pub fn remove_from_group(tx: &mut Transaction<'_>, member: Member) -> Result<(), TimelineError> {
    let Some(parent) = tx.timeline().groups().parent(member) else {
        return Ok(());
    };
    set_parent(tx, member, None)?;

    let remaining: Vec<Member> = tx
        .timeline()
        .groups()
        .children(parent)
        .map(|c| c.iter().copied().collect())
        .unwrap_or_default();
    match remaining.as_slice() {
        [] => {
            remove_from_group(tx, Member::Group(parent))?;
            tx.apply(TimelineCommand::DestroyGroup { group_id: parent })
        }
        [only] => {
            let grandparent = tx.timeline().groups().parent(Member::Group(parent));
            set_parent(tx, *only, grandparent)?;
            set_parent(tx, Member::Group(parent), None)?;
            tx.apply(TimelineCommand::DestroyGroup { group_id: parent })
        }
        _ => Ok(()),
    }
}

/// Puts ungrouped `item` into the group `target` belongs to. Nothing happens
/// when `target` is not grouped.
pub fn set_in_group_of(
    tx: &mut Transaction<'_>,
    item: ItemId,
    target: ItemId,
) -> Result<(), TimelineError> {
    let groups = tx.timeline().groups();
    if groups.parent(Member::Item(item)).is_some() {
        return Err(TimelineError::ItemGrouped(item));
    }
    match groups.parent(Member::Item(target)) {
        Some(parent) => set_parent(tx, Member::Item(item), Some(parent)),
        None => Ok(()),
    }
}

/// Splits the subtree under `root` in two: items matching `predicate` on one
/// side, the rest on the other. Sub-groups are split recursively, and a side
/// holding a single node is not wrapped in a group. Returns the
/// `(matching, rest)` nodes; fails when either side would be empty.
pub fn split<P>(
    tx: &mut Transaction<'_>,
    root: GroupId,
    predicate: P,
) -> Result<(Member, Member), TimelineError>
where
    P: Fn(&Timeline, ItemId) -> bool,
{
    let timeline = tx.timeline();
    if !timeline.groups().contains(root) {
        return Err(TimelineError::GroupNotFound(root));
    }
    // positions do not change while regrouping, so decide sides up front
    let sides: BTreeMap<ItemId, bool> = timeline
        .groups()
        .leaves(Member::Group(root))
        .into_iter()
        .map(|id| (id, predicate(timeline, id)))
        .collect();
    if !sides.values().any(|s| *s) || sides.values().all(|s| *s) {
        return Err(TimelineError::InvalidOp(format!(
            "group {root} has no members on one side of the split"
        )));
    }

    let parent = timeline.groups().parent(Member::Group(root));
    let (matching, rest) = split_node(tx, Member::Group(root), &sides)?;
    let (Some(matching), Some(rest)) = (matching, rest) else {
        return Err(TimelineError::InvalidOp(format!(
            "group {root} could not be split"
        )));
    };
    set_parent(tx, matching, parent)?;
    set_parent(tx, rest, parent)?;
    Ok((matching, rest))
}

/// Returns detached `(matching, rest)` nodes for `node`.
fn split_node(
    tx: &mut Transaction<'_>,
    node: Member,
    sides: &BTreeMap<ItemId, bool>,
) -> Result<(Option<Member>, Option<Member>), TimelineError> {
    let group = match node {
        Member::Item(id) => {
            set_parent(tx, node, None)?;
            return Ok(if sides.get(&id).copied().unwrap_or(false) {
                (Some(node), None)
            } else {
                (None, Some(node))
            });
        }
        Member::Group(group) => group,
    };

    set_parent(tx, node, None)?;
    let children: Vec<Member> = tx
        .timeline()
        .groups()
        .children(group)
        .map(|c| c.iter().copied().collect())
        .unwrap_or_default();
    let mut matching = Vec::new();
    let mut rest = Vec::new();
    for child in children {
        let (a, b) = split_node(tx, child, sides)?;
        matching.extend(a);
        rest.extend(b);
    }

    // `group` is now empty and detached; it is reused for the matching side.
    let matching = match matching.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => {
            for member in many {
                set_parent(tx, *member, Some(group))?;
            }
            Some(Member::Group(group))
        }
    };
    if matching != Some(Member::Group(group)) {
        tx.apply(TimelineCommand::DestroyGroup { group_id: group })?;
    }
    let rest = match rest.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => Some(Member::Group(new_group(tx, many)?)),
    };
    Ok((matching, rest))
}

/// Rebuilds, over the copies in `mapping` (source item to copy), the group
/// structure the source items have. Sources outside the mapping are left out
/// of the mirror; single-member mirrors collapse to the member itself.
pub fn copy_groups(
    tx: &mut Transaction<'_>,
    mapping: &BTreeMap<ItemId, ItemId>,
) -> Result<(), TimelineError> {
    let timeline = tx.timeline();
    for copy in mapping.values() {
        timeline.require_item(*copy)?;
        if timeline.is_in_group(*copy) {
            return Err(TimelineError::ItemGrouped(*copy));
        }
    }
    let roots: BTreeSet<GroupId> = mapping
        .keys()
        .filter_map(|source| match timeline.root_of(*source) {
            Member::Group(group) => Some(group),
            Member::Item(_) => None,
        })
        .collect();
    for root in roots {
        mirror(tx, Member::Group(root), mapping)?;
    }
    Ok(())
}

fn mirror(
    tx: &mut Transaction<'_>,
    node: Member,
    mapping: &BTreeMap<ItemId, ItemId>,
) -> Result<Option<Member>, TimelineError> {
    match node {
        Member::Item(id) => Ok(mapping.get(&id).map(|copy| Member::Item(*copy))),
        Member::Group(group) => {
            let children: Vec<Member> = tx
                .timeline()
                .groups()
                .children(group)
                .map(|c| c.iter().copied().collect())
                .unwrap_or_default();
            let mut mirrored = Vec::new();
            for child in children {
                mirrored.extend(mirror(tx, child, mapping)?);
            }
            match mirrored.as_slice() {
                [] => Ok(None),
                [only] => Ok(Some(*only)),
                many => Ok(Some(Member::Group(new_group(tx, many)?))),
            }
        }
    }
}

/// Moves every item under `member` by a track and frame offset in one step.
pub fn move_group(
    tx: &mut Transaction<'_>,
    member: Member,
    track_delta: isize,
    frame_delta: Frame,
) -> Result<(), TimelineError> {
    let timeline = tx.timeline();
    let mut moves = Vec::new();
    for item_id in timeline.groups().leaves(member) {
        let item = timeline.require_item(item_id)?;
        let index = timeline.item_track_index(item_id)? as isize + track_delta;
        moves.push(ItemPlacement {
            item_id,
            track_id: Some(timeline.track_at(index)?),
            position: item.position + frame_delta,
        });
    }
    match member {
        Member::Item(item_id) => {
            let ItemPlacement {
                track_id, position, ..
            } = moves[0];
            tx.apply(TimelineCommand::MoveItem {
                item_id,
                track_id,
                position,
            })
        }
        Member::Group(_) => tx.apply(TimelineCommand::MoveItems { moves }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compose, MediaSource, TrackKind};

    fn timeline_with(count: usize) -> (Timeline, Vec<ItemId>) {
        let mut timeline = Timeline::new("groups");
        timeline.add_media(MediaSource::new("m", 1000));
        let track = timeline.add_track("V1", TrackKind::Video);
        let items = (0..count)
            .map(|i| timeline.add_clip("m", track, i as Frame * 100, 50).unwrap())
            .collect();
        (timeline, items)
    }

    fn items(ids: &[ItemId]) -> Vec<Member> {
        ids.iter().map(|id| Member::Item(*id)).collect()
    }

    #[test]
    fn group_and_ungroup() {
        let (mut timeline, ids) = timeline_with(3);
        let (group, edit) =
            compose(&mut timeline, |tx| group_members(tx, &items(&ids))).unwrap();
        assert_eq!(timeline.group_elements(ids[0]).len(), 3);
        assert_eq!(timeline.root_of(ids[2]), Member::Group(group));

        let ((), ungroup_edit) = compose(&mut timeline, |tx| ungroup(tx, group)).unwrap();
        assert!(!timeline.is_in_group(ids[0]));
        assert_eq!(timeline.groups().group_count(), 0);

        ungroup_edit.undo(&mut timeline).unwrap();
        assert_eq!(timeline.root_of(ids[1]), Member::Group(group));
        edit.undo(&mut timeline).unwrap();
        assert_eq!(timeline.groups().group_count(), 0);
        edit.redo(&mut timeline).unwrap();
        assert!(timeline.is_in_group(ids[1]));
    }

    #[test]
    fn grouping_a_single_root_is_refused() {
        let (mut timeline, ids) = timeline_with(2);
        compose(&mut timeline, |tx| group_members(tx, &items(&ids))).unwrap();
        assert!(compose(&mut timeline, |tx| group_members(tx, &items(&ids))).is_err());
    }

    #[test]
    fn split_keeps_nested_structure() {
        let (mut timeline, ids) = timeline_with(4);
        let (root, _) = compose(&mut timeline, |tx| {
            let inner = group_members(tx, &items(&ids[0..2]))?;
            group_members(
                tx,
                &[Member::Group(inner), Member::Item(ids[2]), Member::Item(ids[3])],
            )
        })
        .unwrap();

        // left: items 0 and 2, right: items 1 and 3
        let ((left, right), _) = compose(&mut timeline, |tx| {
            split(tx, root, |t, id| t.item(id).unwrap().position % 200 == 0)
        })
        .unwrap();

        let groups = timeline.groups();
        assert_eq!(groups.leaves(left), BTreeSet::from([ids[0], ids[2]]));
        assert_eq!(groups.leaves(right), BTreeSet::from([ids[1], ids[3]]));
        assert_ne!(groups.root(Member::Item(ids[0])), groups.root(Member::Item(ids[1])));
        assert_eq!(groups.roots().len(), 2);
    }

    #[test]
    fn split_with_one_sided_predicate_fails() {
        let (mut timeline, ids) = timeline_with(2);
        let (root, _) = compose(&mut timeline, |tx| group_members(tx, &items(&ids))).unwrap();
        let before = timeline.snapshot();
        assert!(compose(&mut timeline, |tx| split(tx, root, |_, _| true)).is_err());
        assert_eq!(timeline.snapshot(), before);
    }

    #[test]
    fn remove_from_group_collapses_single_child_parents() {
        let (mut timeline, ids) = timeline_with(3);
        let (outer, _) = compose(&mut timeline, |tx| {
            let inner = group_members(tx, &items(&ids[0..2]))?;
            group_members(tx, &[Member::Group(inner), Member::Item(ids[2])])
        })
        .unwrap();

        compose(&mut timeline, |tx| remove_from_group(tx, Member::Item(ids[0]))).unwrap();
        let groups = timeline.groups();
        assert_eq!(groups.group_count(), 1);
        assert_eq!(groups.parent(Member::Item(ids[1])), Some(outer));
        assert!(groups.parent(Member::Item(ids[0])).is_none());
    }

    #[test]
    fn copy_groups_mirrors_hierarchy() {
        let (mut timeline, ids) = timeline_with(6);
        compose(&mut timeline, |tx| {
            let inner = group_members(tx, &items(&ids[0..2]))?;
            group_members(tx, &[Member::Group(inner), Member::Item(ids[2])])
        })
        .unwrap();
        let mapping: BTreeMap<ItemId, ItemId> =
            [(ids[0], ids[3]), (ids[1], ids[4]), (ids[2], ids[5])].into();

        compose(&mut timeline, |tx| copy_groups(tx, &mapping)).unwrap();
        let groups = timeline.groups();
        assert_eq!(
            timeline.group_elements(ids[3]),
            BTreeSet::from([ids[3], ids[4], ids[5]])
        );
        let copy_inner = groups.parent(Member::Item(ids[3])).unwrap();
        assert_eq!(groups.parent(Member::Item(ids[4])), Some(copy_inner));
        assert_ne!(groups.parent(Member::Item(ids[5])), Some(copy_inner));
    }

    #[test]
    fn copy_groups_rejects_grouped_targets() {
        let (mut timeline, ids) = timeline_with(4);
        compose(&mut timeline, |tx| {
            group_members(tx, &items(&ids[0..2]))?;
            group_members(tx, &items(&ids[2..4]))
        })
        .unwrap();
        let mapping: BTreeMap<ItemId, ItemId> = [(ids[0], ids[2]), (ids[1], ids[3])].into();
        assert!(compose(&mut timeline, |tx| copy_groups(tx, &mapping)).is_err());
    }

    #[test]
    fn group_tree_json_round_trip_rebuilds_parents() {
        let (mut timeline, ids) = timeline_with(2);
        compose(&mut timeline, |tx| group_members(tx, &items(&ids))).unwrap();
        let json = serde_json::to_string(timeline.groups()).unwrap();
        let restored: GroupTree = serde_json::from_str(&json).unwrap();
        assert_eq!(&restored, timeline.groups());
    }
}
