use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    cache::ClipRangeCache,
    clip::{Clip, ClipCloneOptions, ClipContent, ClipId},
    error::{AggregateError, TimelineError},
    span::FrameSpan,
    timeline::TimelineId,
};

pub const DEFAULT_GAP_DURATION: i64 = 300;
pub const MAX_GAP_DURATION: i64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(Uuid);

impl TrackId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackCloneOptions {
    /// `None` produces an empty copy of the track.
    pub clips: Option<ClipCloneOptions>,
}

impl Default for TrackCloneOptions {
    fn default() -> Self {
        Self {
            clips: Some(ClipCloneOptions::default()),
        }
    }
}

/// Ordered clip container. Every membership or span change goes through the
/// track so its [`ClipRangeCache`] and the clips' back-references stay in
/// step.
#[derive(Debug)]
pub struct Track {
    id: TrackId,
    name: String,
    kind: TrackKind,
    visible: bool,
    opacity: f64,
    timeline: Option<TimelineId>,
    clips: HashMap<ClipId, Clip>,
    order: Vec<ClipId>,
    cache: ClipRangeCache,
}

impl Track {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self::with_cache(name, kind, ClipRangeCache::new())
    }

    #[must_use]
    pub fn video(name: impl Into<String>) -> Self {
        Self::new(name, TrackKind::Video)
    }

    #[must_use]
    pub fn audio(name: impl Into<String>) -> Self {
        Self::new(name, TrackKind::Audio)
    }

    #[must_use]
    pub fn with_cache(name: impl Into<String>, kind: TrackKind, cache: ClipRangeCache) -> Self {
        Self {
            id: TrackId::new(),
            name: name.into(),
            kind,
            visible: true,
            opacity: 1.0,
            timeline: None,
            clips: HashMap::new(),
            order: Vec::new(),
            cache,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: TrackId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub const fn id(&self) -> TrackId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    #[must_use]
    pub const fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    /// Visible and not faded out to (near) zero opacity.
    #[must_use]
    pub fn is_effectively_visible(&self, epsilon: f64) -> bool {
        self.visible && self.opacity > epsilon
    }

    #[must_use]
    pub const fn timeline(&self) -> Option<TimelineId> {
        self.timeline
    }

    pub(crate) fn set_timeline(&mut self, timeline: Option<TimelineId>) {
        self.timeline = timeline;
    }

    #[must_use]
    pub const fn cache(&self) -> &ClipRangeCache {
        &self.cache
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Clips in insertion order.
    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.order.iter().filter_map(|id| self.clips.get(id))
    }

    #[must_use]
    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.get(&id)
    }

    /// Mutable access for properties that do not affect indexing. Span
    /// changes go through [`Track::set_clip_span`].
    pub fn clip_mut(&mut self, id: ClipId) -> Option<&mut Clip> {
        self.clips.get_mut(&id)
    }

    #[must_use]
    pub fn clip_at(&self, index: usize) -> Option<&Clip> {
        self.order.get(index).and_then(|id| self.clips.get(id))
    }

    #[must_use]
    pub fn index_of(&self, id: ClipId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// Video tracks take visual and adjustment clips, audio tracks take audio
    /// clips.
    #[must_use]
    pub fn accepts(&self, clip: &Clip) -> bool {
        match self.kind {
            TrackKind::Video => {
                matches!(clip.content(), ClipContent::Visual(_) | ClipContent::Adjustment)
            }
            TrackKind::Audio => matches!(clip.content(), ClipContent::Audio(_)),
        }
    }

    pub fn add_clip(&mut self, clip: Clip) -> Result<ClipId, TimelineError> {
        self.insert_clip(self.order.len(), clip)
    }

    #[instrument(skip(self, clip), fields(track_id = %self.id, clip_id = %clip.id()))]
    pub fn insert_clip(&mut self, index: usize, mut clip: Clip) -> Result<ClipId, TimelineError> {
        self.check_insertable(index, &clip)?;

        let id = clip.id();
        let span = clip.span();
        self.cache.add(id, span)?;
        clip.set_track(Some(self.id));
        self.order.insert(index, id);
        self.clips.insert(id, clip);
        info!(index, span = %span, "clip inserted");
        Ok(id)
    }

    #[instrument(skip(self), fields(track_id = %self.id))]
    pub fn remove_clip_at(&mut self, index: usize) -> Result<Clip, TimelineError> {
        let id = *self.order.get(index).ok_or(TimelineError::IndexOutOfRange {
            index,
            len: self.order.len(),
        })?;
        let span = self
            .clips
            .get(&id)
            .map(Clip::span)
            .ok_or(TimelineError::ClipNotFound(id))?;

        self.cache.remove(span, id)?;
        self.order.remove(index);
        let mut clip = self
            .clips
            .remove(&id)
            .ok_or(TimelineError::ClipNotFound(id))?;
        clip.set_track(None);
        info!(clip_id = %id, "clip removed");
        Ok(clip)
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Result<Option<Clip>, TimelineError> {
        match self.index_of(id) {
            Some(index) => self.remove_clip_at(index).map(Some),
            None => Ok(None),
        }
    }

    /// Reorders a clip inside this track. Rendering order is unaffected.
    pub fn move_clip(&mut self, old_index: usize, new_index: usize) -> Result<(), TimelineError> {
        let len = self.order.len();
        if old_index >= len {
            return Err(TimelineError::IndexOutOfRange {
                index: old_index,
                len,
            });
        }
        if new_index >= len {
            return Err(TimelineError::IndexOutOfRange {
                index: new_index,
                len,
            });
        }
        let id = self.order.remove(old_index);
        self.order.insert(new_index, id);
        Ok(())
    }

    /// Moves the clip at `old_index` into `target` at `new_index`. Every check
    /// runs before either track is touched.
    #[instrument(skip(self, target), fields(track_id = %self.id, target_id = %target.id))]
    pub fn move_clip_to_track(
        &mut self,
        old_index: usize,
        target: &mut Self,
        new_index: usize,
    ) -> Result<ClipId, TimelineError> {
        let clip = self.clip_at(old_index).ok_or(TimelineError::IndexOutOfRange {
            index: old_index,
            len: self.order.len(),
        })?;
        if new_index > target.order.len() {
            return Err(TimelineError::IndexOutOfRange {
                index: new_index,
                len: target.order.len(),
            });
        }
        if self.timeline != target.timeline {
            return Err(TimelineError::CrossTimelineMove);
        }
        if clip.is_disposed() {
            return Err(TimelineError::DisposedClip(clip.id()));
        }
        target.cache.check_span(clip.span())?;
        if !target.accepts(clip) {
            return Err(TimelineError::ClipRejected {
                track: target.id,
                clip: clip.id(),
                content: clip.content().label(),
            });
        }
        if target.clips.contains_key(&clip.id()) {
            return Err(TimelineError::DuplicateClip {
                clip: clip.id(),
                track: target.id,
            });
        }

        let clip = self.remove_clip_at(old_index)?;
        target.insert_clip(new_index, clip)
    }

    #[instrument(skip(self), fields(track_id = %self.id))]
    pub fn set_clip_span(&mut self, id: ClipId, span: FrameSpan) -> Result<(), TimelineError> {
        let clip = self
            .clips
            .get_mut(&id)
            .ok_or(TimelineError::ClipNotFound(id))?;
        let old_span = clip.span();
        self.cache.on_span_changed(id, old_span, span)?;
        clip.set_span(span);
        debug!(clip_id = %id, old_span = %old_span, new_span = %span, "clip span changed");
        Ok(())
    }

    pub fn make_clip_topmost(&mut self, id: ClipId) -> Result<(), TimelineError> {
        let span = self
            .clips
            .get(&id)
            .map(Clip::span)
            .ok_or(TimelineError::ClipNotFound(id))?;
        self.cache.make_topmost(id, span)
    }

    #[must_use]
    pub fn primary_clip_id_at(&self, frame: i64) -> Option<ClipId> {
        self.cache.get_primary_at(frame)
    }

    #[must_use]
    pub fn clip_at_frame(&self, frame: i64) -> Option<&Clip> {
        self.cache
            .get_primary_at(frame)
            .and_then(|id| self.clips.get(&id))
    }

    /// Clips intersecting `frame`, topmost first.
    #[must_use]
    pub fn clips_at_frame(&self, frame: i64) -> Vec<&Clip> {
        self.cache
            .clips_at_frame(frame)
            .into_iter()
            .filter_map(|id| self.clips.get(&id))
            .collect()
    }

    #[must_use]
    pub fn clips_in_span(&self, span: FrameSpan) -> Vec<&Clip> {
        self.cache
            .clips_in_span(span)
            .into_iter()
            .filter_map(|id| self.clips.get(&id))
            .collect()
    }

    #[must_use]
    pub fn is_region_empty(&self, span: FrameSpan) -> bool {
        self.cache.is_region_empty(span)
    }

    /// Span starting at `frame` that fills the gap up to the next clip, capped
    /// at `max_duration`. `default_duration` is used when no clip follows.
    /// `None` when a clip already covers `frame`.
    #[must_use]
    pub fn span_until_clip(
        &self,
        frame: i64,
        default_duration: i64,
        max_duration: i64,
    ) -> Option<FrameSpan> {
        if self.clips.values().any(|clip| clip.intersects_frame(frame)) {
            return None;
        }
        let next_begin = self
            .clips
            .values()
            .map(|clip| clip.span().begin)
            .filter(|begin| *begin > frame)
            .min();
        Some(match next_begin {
            Some(begin) => FrameSpan::new(frame, (begin - frame).min(max_duration)),
            None => FrameSpan::new(frame, default_duration),
        })
    }

    #[must_use]
    pub fn span_until_clip_or_default(&self, frame: i64) -> FrameSpan {
        self.span_until_clip(frame, DEFAULT_GAP_DURATION, MAX_GAP_DURATION)
            .unwrap_or(FrameSpan::new(frame, DEFAULT_GAP_DURATION))
    }

    /// Structurally independent copy with a fresh id and no timeline.
    pub fn clone_with(&self, options: TrackCloneOptions) -> Result<Self, TimelineError> {
        let mut copy = Self::with_cache(
            self.name.clone(),
            self.kind,
            ClipRangeCache::with_chunk_shift(self.cache.chunk_shift()),
        );
        copy.visible = self.visible;
        copy.opacity = self.opacity;

        if let Some(clip_options) = options.clips {
            for clip in self.clips().filter(|clip| !clip.is_disposed()) {
                copy.add_clip(clip.duplicate(clip_options))?;
            }
        }
        Ok(copy)
    }

    /// Disposes and removes every clip, last first. Every failure is
    /// collected; none stops the loop.
    #[instrument(skip(self), fields(track_id = %self.id, clip_count = self.order.len()))]
    pub fn clear_clips(&mut self) -> Result<(), AggregateError> {
        let mut errors = Vec::new();
        while let Some(index) = self.order.len().checked_sub(1) {
            let id = self.order[index];
            if let Some(clip) = self.clips.get_mut(&id) {
                if let Err(error) = clip.dispose() {
                    errors.push(error.context(format!("failed to dispose clip {id}")));
                }
            }
            if let Err(error) = self.remove_clip_at(index) {
                errors.push(
                    anyhow::Error::new(error).context(format!("failed to remove clip {id}")),
                );
                self.order.truncate(index);
                self.clips.remove(&id);
            }
        }
        AggregateError::check(format!("failed to clear track {}", self.id), errors)
    }

    fn check_insertable(&self, index: usize, clip: &Clip) -> Result<(), TimelineError> {
        if index > self.order.len() {
            return Err(TimelineError::IndexOutOfRange {
                index,
                len: self.order.len(),
            });
        }
        if clip.is_disposed() {
            return Err(TimelineError::DisposedClip(clip.id()));
        }
        if let Some(owner) = clip.track() {
            return Err(TimelineError::ClipAlreadyOwned {
                clip: clip.id(),
                track: owner,
            });
        }
        if self.clips.contains_key(&clip.id()) {
            return Err(TimelineError::DuplicateClip {
                clip: clip.id(),
                track: self.id,
            });
        }
        if !self.accepts(clip) {
            return Err(TimelineError::ClipRejected {
                track: self.id,
                clip: clip.id(),
                content: clip.content().label(),
            });
        }
        Ok(())
    }
}
