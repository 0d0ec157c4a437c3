use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use uuid::Uuid;

use crate::{apply_command, Frame, FrameRange, GroupTree, Member, TimelineCommand, TimelineError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bin entry an item can reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaSource {
    pub id: String,
    pub name: String,
    /// Length in frames.
    pub length: Frame,
    #[serde(default = "default_true")]
    pub has_audio: bool,
    #[serde(default = "default_true")]
    pub has_video: bool,
}

fn default_true() -> bool {
    true
}

impl MediaSource {
    pub fn new(id: impl Into<String>, length: Frame) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            length,
            has_audio: true,
            has_video: true,
        }
    }

    pub fn video_only(mut self) -> Self {
        self.has_audio = false;
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.has_video = false;
        self
    }

    pub fn supports(&self, state: ClipState) -> bool {
        match state {
            ClipState::AudioVideo => self.has_audio || self.has_video,
            ClipState::VideoOnly => self.has_video,
            ClipState::AudioOnly => self.has_audio,
            ClipState::Disabled => true,
        }
    }
}

/// Which media channels an item presents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClipState {
    AudioVideo,
    VideoOnly,
    AudioOnly,
    Disabled,
}

impl Default for ClipState {
    fn default() -> Self {
        Self::AudioVideo
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    Clip { bin_id: String },
    Composition { composition_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectInstance {
    pub effect_id: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl EffectInstance {
    pub fn new(effect_id: impl Into<String>) -> Self {
        Self {
            effect_id: effect_id.into(),
            params: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: ItemId,
    #[serde(flatten)]
    pub kind: ItemKind,
    #[serde(default)]
    pub track_id: Option<TrackId>,
    pub position: Frame,
    pub duration: Frame,
    /// Trim offset into the media.
    #[serde(default)]
    pub in_point: Frame,
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Endless items (titles, colors, compositions) ignore media bounds.
    #[serde(default)]
    pub endless: bool,
    #[serde(default)]
    pub state: ClipState,
    #[serde(default)]
    pub effects: Vec<EffectInstance>,
}

fn default_speed() -> f32 {
    1.0
}

impl Item {
    pub fn clip(bin_id: impl Into<String>, duration: Frame) -> Self {
        Self {
            id: ItemId::new(),
            kind: ItemKind::Clip {
                bin_id: bin_id.into(),
            },
            track_id: None,
            position: 0,
            duration,
            in_point: 0,
            speed: 1.0,
            endless: false,
            state: ClipState::default(),
            effects: Vec::new(),
        }
    }

    pub fn composition(composition_id: impl Into<String>, duration: Frame) -> Self {
        Self {
            id: ItemId::new(),
            kind: ItemKind::Composition {
                composition_id: composition_id.into(),
            },
            track_id: None,
            position: 0,
            duration,
            in_point: 0,
            speed: 1.0,
            endless: true,
            state: ClipState::default(),
            effects: Vec::new(),
        }
    }

    pub fn end(&self) -> Frame {
        self.position + self.duration
    }

    pub fn range(&self) -> FrameRange {
        FrameRange::new(self.position, self.duration)
    }

    /// True when `position` falls strictly between the item's start and end.
    pub fn straddles(&self, position: Frame) -> bool {
        self.position < position && position < self.end()
    }

    pub fn bin_id(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Clip { bin_id } => Some(bin_id),
            ItemKind::Composition { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

impl Default for TrackKind {
    fn default() -> Self {
        Self::Video
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    #[serde(default)]
    pub kind: TrackKind,
    /// Sorted by item position.
    #[serde(default)]
    pub item_ids: Vec<ItemId>,
}

/// Time range whose cached render must be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderInvalidation {
    pub track_id: TrackId,
    pub range: FrameRange,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RefreshState {
    pub(crate) replugs: BTreeMap<TrackId, u64>,
    pub(crate) invalidations: Vec<RenderInvalidation>,
}

/// Comparable view of everything an edit may touch.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSnapshot {
    pub items: BTreeMap<ItemId, Item>,
    pub tracks: Vec<Track>,
    pub groups: GroupTree,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    pub name: String,
    #[serde(default)]
    pub(crate) bin: BTreeMap<String, MediaSource>,
    #[serde(default)]
    pub(crate) tracks: Vec<Track>,
    #[serde(default)]
    pub(crate) items: BTreeMap<ItemId, Item>,
    #[serde(default)]
    pub(crate) groups: GroupTree,
    #[serde(skip)]
    pub(crate) refresh: RefreshState,
}

impl Timeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_media(&mut self, source: MediaSource) {
        self.bin.insert(source.id.clone(), source);
    }

    pub fn add_track(&mut self, name: impl Into<String>, kind: TrackKind) -> TrackId {
        let id = TrackId::new();
        self.tracks.push(Track {
            id,
            name: name.into(),
            kind,
            item_ids: Vec::new(),
        });
        id
    }

    /// Places a clip covering `duration` frames of `bin_id` from its start.
    /// Document setup only; nothing is recorded.
    pub fn add_clip(
        &mut self,
        bin_id: &str,
        track_id: TrackId,
        position: Frame,
        duration: Frame,
    ) -> Result<ItemId, TimelineError> {
        let mut item = Item::clip(bin_id, duration);
        item.track_id = Some(track_id);
        item.position = position;
        let id = item.id;
        apply_command(self, TimelineCommand::CreateItem { item })?;
        Ok(id)
    }

    pub fn media(&self, id: &str) -> Option<&MediaSource> {
        self.bin.get(id)
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn require_item(&self, id: ItemId) -> Result<&Item, TimelineError> {
        self.items.get(&id).ok_or(TimelineError::ItemNotFound(id))
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track_index(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    pub fn track_at(&self, index: isize) -> Result<TrackId, TimelineError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.tracks.get(i))
            .map(|t| t.id)
            .ok_or(TimelineError::TrackIndexOutOfRange {
                index,
                count: self.tracks.len(),
            })
    }

    /// Track index of the item's track.
    pub fn item_track_index(&self, id: ItemId) -> Result<usize, TimelineError> {
        let track_id = self
            .require_item(id)?
            .track_id
            .ok_or(TimelineError::NotOnTrack(id))?;
        self.track_index(track_id)
            .ok_or(TimelineError::TrackNotFound(track_id))
    }

    /// Items on `track_id` in position order.
    pub fn track_items(&self, track_id: TrackId) -> Vec<&Item> {
        self.track(track_id)
            .map(|t| t.item_ids.iter().filter_map(|id| self.items.get(id)).collect())
            .unwrap_or_default()
    }

    /// Item covering `frame` on a track, if any.
    pub fn item_at(&self, track_id: TrackId, frame: Frame) -> Option<ItemId> {
        self.track_items(track_id)
            .into_iter()
            .find(|item| item.position <= frame && frame < item.end())
            .map(|item| item.id)
    }

    /// Placed items whose start lies in `[from, to)` (`to = None` is unbounded),
    /// on one track or, with `track_id = None`, on every track.
    pub fn items_starting_in(
        &self,
        track_id: Option<TrackId>,
        from: Frame,
        to: Option<Frame>,
    ) -> Vec<ItemId> {
        let mut found: Vec<&Item> = self
            .items
            .values()
            .filter(|item| match (item.track_id, track_id) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(own), Some(wanted)) => own == wanted,
            })
            .filter(|item| item.position >= from && to.map_or(true, |to| item.position < to))
            .collect();
        found.sort_by_key(|item| (item.position, item.id));
        found.into_iter().map(|item| item.id).collect()
    }

    pub fn groups(&self) -> &GroupTree {
        &self.groups
    }

    pub fn is_in_group(&self, id: ItemId) -> bool {
        self.groups.parent(Member::Item(id)).is_some()
    }

    pub fn root_of(&self, id: ItemId) -> Member {
        self.groups.root(Member::Item(id))
    }

    /// Every item sharing the top-level group of `id` (just `id` when ungrouped).
    pub fn group_elements(&self, id: ItemId) -> BTreeSet<ItemId> {
        self.groups.leaves(self.root_of(id))
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            items: self.items.clone(),
            tracks: self.tracks.clone(),
            groups: self.groups.clone(),
        }
    }

    /// How many times the track's rendering representation was rebuilt.
    pub fn replug_count(&self, track_id: TrackId) -> u64 {
        self.refresh.replugs.get(&track_id).copied().unwrap_or(0)
    }

    pub fn take_invalidations(&mut self) -> Vec<RenderInvalidation> {
        std::mem::take(&mut self.refresh.invalidations)
    }

    pub(crate) fn find_overlap(
        &self,
        track_id: TrackId,
        range: FrameRange,
        ignore: &BTreeSet<ItemId>,
    ) -> Option<ItemId> {
        self.track_items(track_id)
            .into_iter()
            .filter(|other| !ignore.contains(&other.id))
            .find(|other| other.range().overlaps(&range))
            .map(|other| other.id)
    }
}
