use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    cache::{ClipRangeCache, DEFAULT_CHUNK_SHIFT},
    clip::{Clip, ClipId},
    error::{AggregateError, TimelineError},
    render::{RenderPhase, RenderState},
    span::FrameSpan,
    track::{Track, TrackId, TrackKind},
};

pub const DEFAULT_OPACITY_EPSILON: f64 = 1e-4;
pub const DEFAULT_MAX_DURATION: i64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimelineId(Uuid);

impl TimelineId {
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

impl Default for TimelineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineOptions {
    /// Chunk shift of the range cache of tracks created by this timeline.
    pub chunk_shift: u32,
    /// Opacities within this distance of 1.0 composite without a layer, and
    /// tracks at or below it are skipped.
    pub opacity_epsilon: f64,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            chunk_shift: DEFAULT_CHUNK_SHIFT,
            opacity_epsilon: DEFAULT_OPACITY_EPSILON,
        }
    }
}

/// Ordered stack of tracks. Index 0 is the top-most track and composites
/// last.
#[derive(Debug)]
pub struct Timeline {
    pub(crate) id: TimelineId,
    pub(crate) name: String,
    pub(crate) tracks: Vec<Track>,
    pub(crate) play_head: i64,
    pub(crate) max_duration: i64,
    pub(crate) options: TimelineOptions,
    pub(crate) render_state: RenderState,
    pub(crate) last_render_duration: Option<Duration>,
}

impl Timeline {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, TimelineOptions::default())
    }

    #[must_use]
    pub fn with_options(name: impl Into<String>, options: TimelineOptions) -> Self {
        Self {
            id: TimelineId::new(),
            name: name.into(),
            tracks: Vec::new(),
            play_head: 0,
            max_duration: DEFAULT_MAX_DURATION,
            options,
            render_state: RenderState::default(),
            last_render_duration: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> TimelineId {
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
    pub const fn options(&self) -> TimelineOptions {
        self.options
    }

    #[must_use]
    pub const fn play_head(&self) -> i64 {
        self.play_head
    }

    /// Moves the play head, clamped to `0..=max_duration`.
    pub fn set_play_head(&mut self, frame: i64) {
        self.play_head = frame.clamp(0, self.max_duration);
    }

    #[must_use]
    pub const fn max_duration(&self) -> i64 {
        self.max_duration
    }

    pub fn set_max_duration(&mut self, max_duration: i64) {
        self.max_duration = max_duration.max(0);
        self.play_head = self.play_head.min(self.max_duration);
    }

    #[must_use]
    pub const fn last_render_duration(&self) -> Option<Duration> {
        self.last_render_duration
    }

    #[must_use]
    pub const fn render_phase(&self) -> RenderPhase {
        self.render_state.phase
    }

    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.render_state.phase != RenderPhase::Idle
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[must_use]
    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    #[must_use]
    pub fn track_by_id(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id() == id)
    }

    #[must_use]
    pub fn index_of_track(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|track| track.id() == id)
    }

    /// Mutable track access. Rejected while a composite render is in flight.
    pub fn track_mut(&mut self, index: usize) -> Result<&mut Track, TimelineError> {
        self.ensure_idle()?;
        let len = self.tracks.len();
        self.tracks
            .get_mut(index)
            .ok_or(TimelineError::IndexOutOfRange { index, len })
    }

    pub fn track_by_id_mut(&mut self, id: TrackId) -> Result<&mut Track, TimelineError> {
        self.ensure_idle()?;
        self.tracks
            .iter_mut()
            .find(|track| track.id() == id)
            .ok_or(TimelineError::TrackNotFound(id))
    }

    /// Detached track whose cache uses this timeline's chunk shift.
    #[must_use]
    pub fn create_track(&self, name: impl Into<String>, kind: TrackKind) -> Track {
        Track::with_cache(
            name,
            kind,
            ClipRangeCache::with_chunk_shift(self.options.chunk_shift),
        )
    }

    /// Appends `track` below every existing track and returns its index.
    pub fn add_track(&mut self, track: Track) -> Result<usize, TimelineError> {
        let index = self.tracks.len();
        self.insert_track(index, track)?;
        Ok(index)
    }

    #[instrument(skip(self, track), fields(timeline_id = %self.id, track_id = %track.id()))]
    pub fn insert_track(&mut self, index: usize, mut track: Track) -> Result<(), TimelineError> {
        self.ensure_idle()?;
        if index > self.tracks.len() {
            return Err(TimelineError::IndexOutOfRange {
                index,
                len: self.tracks.len(),
            });
        }
        if let Some(timeline) = track.timeline() {
            return Err(TimelineError::TrackAlreadyOwned {
                track: track.id(),
                timeline,
            });
        }
        if self.index_of_track(track.id()).is_some() {
            return Err(TimelineError::DuplicateTrack(track.id()));
        }
        for clip in track.clips() {
            if let Some((owner, _)) = self.find_clip(clip.id()) {
                return Err(TimelineError::ClipAlreadyOwned {
                    clip: clip.id(),
                    track: self.tracks[owner].id(),
                });
            }
        }

        track.set_timeline(Some(self.id));
        self.tracks.insert(index, track);
        info!(index, "track inserted");
        Ok(())
    }

    #[instrument(skip(self), fields(timeline_id = %self.id))]
    pub fn remove_track_at(&mut self, index: usize) -> Result<Track, TimelineError> {
        self.ensure_idle()?;
        if index >= self.tracks.len() {
            return Err(TimelineError::IndexOutOfRange {
                index,
                len: self.tracks.len(),
            });
        }
        let mut track = self.tracks.remove(index);
        track.set_timeline(None);
        info!(track_id = %track.id(), "track removed");
        Ok(track)
    }

    pub fn remove_track(&mut self, id: TrackId) -> Result<Option<Track>, TimelineError> {
        match self.index_of_track(id) {
            Some(index) => self.remove_track_at(index).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(timeline_id = %self.id))]
    pub fn move_track(&mut self, old_index: usize, new_index: usize) -> Result<(), TimelineError> {
        self.ensure_idle()?;
        let len = self.tracks.len();
        for index in [old_index, new_index] {
            if index >= len {
                return Err(TimelineError::IndexOutOfRange { index, len });
            }
        }
        let track = self.tracks.remove(old_index);
        self.tracks.insert(new_index, track);
        Ok(())
    }

    /// Moves a clip between (or within) tracks of this timeline.
    #[instrument(skip(self), fields(timeline_id = %self.id))]
    pub fn move_clip(
        &mut self,
        source_track: usize,
        clip_index: usize,
        target_track: usize,
        target_index: usize,
    ) -> Result<ClipId, TimelineError> {
        self.ensure_idle()?;
        let len = self.tracks.len();
        for index in [source_track, target_track] {
            if index >= len {
                return Err(TimelineError::IndexOutOfRange { index, len });
            }
        }

        if source_track == target_track {
            let track = &mut self.tracks[source_track];
            let id = track
                .clip_at(clip_index)
                .map(Clip::id)
                .ok_or(TimelineError::IndexOutOfRange {
                    index: clip_index,
                    len: track.len(),
                })?;
            track.move_clip(clip_index, target_index)?;
            return Ok(id);
        }

        let (source, target) = if source_track < target_track {
            let (upper, lower) = self.tracks.split_at_mut(target_track);
            (&mut upper[source_track], &mut lower[0])
        } else {
            let (upper, lower) = self.tracks.split_at_mut(source_track);
            (&mut lower[0], &mut upper[target_track])
        };
        source.move_clip_to_track(clip_index, target, target_index)
    }

    #[must_use]
    pub fn find_clip(&self, id: ClipId) -> Option<(usize, &Clip)> {
        self.tracks
            .iter()
            .enumerate()
            .find_map(|(index, track)| track.clip(id).map(|clip| (index, clip)))
    }

    #[must_use]
    pub fn clip_count(&self) -> usize {
        self.tracks.iter().map(Track::len).sum()
    }

    /// Largest end frame of any clip, from the tracks' cached bounds.
    #[must_use]
    pub fn largest_frame_in_use(&self) -> i64 {
        self.tracks
            .iter()
            .filter(|track| !track.cache().is_empty())
            .map(|track| track.cache().largest_active_frame())
            .max()
            .unwrap_or(0)
    }

    /// Union of every clip span, or `None` for an empty timeline.
    #[must_use]
    pub fn used_frame_span(&self) -> Option<FrameSpan> {
        FrameSpan::union_all(
            self.tracks
                .iter()
                .flat_map(Track::clips)
                .map(Clip::span),
        )
    }

    /// Disposes every clip and removes every track, bottom first. Failures are
    /// collected and reported together.
    #[instrument(skip(self), fields(timeline_id = %self.id, track_count = self.tracks.len()))]
    pub fn clear_tracks(&mut self) -> Result<(), AggregateError> {
        if let Err(error) = self.ensure_idle() {
            return Err(AggregateError {
                message: format!("cannot clear timeline {}", self.id),
                errors: vec![error.into()],
            });
        }

        let mut errors = Vec::new();
        while let Some(mut track) = self.tracks.pop() {
            if let Err(error) = track.clear_clips() {
                warn!(
                    track_id = %track.id(),
                    failures = error.errors.len(),
                    "track teardown reported failures"
                );
                errors.extend(error.errors);
            }
            track.set_timeline(None);
        }
        AggregateError::check(format!("failed to clear timeline {}", self.id), errors)
    }

    fn ensure_idle(&self) -> Result<(), TimelineError> {
        if self.is_rendering() {
            return Err(TimelineError::RenderInFlight);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builtin::SolidColorRenderer, render::CancelToken, surface::Rgba};

    fn solid(span: FrameSpan) -> Clip {
        Clip::visual("solid", span, SolidColorRenderer::new(Rgba::WHITE))
    }

    #[test]
    fn tracks_join_and_leave_timeline() {
        let mut timeline = Timeline::new("main");
        let track = timeline.create_track("V1", TrackKind::Video);
        let track_id = track.id();
        timeline.add_track(track).expect("track should insert");

        assert_eq!(
            timeline.track(0).and_then(Track::timeline),
            Some(timeline.id())
        );

        let removed = timeline
            .remove_track(track_id)
            .expect("removal should succeed")
            .expect("track should have been a member");
        assert_eq!(removed.timeline(), None);
        assert!(timeline.tracks().is_empty());
    }

    #[test]
    fn a_clip_id_cannot_live_in_two_tracks() {
        let mut timeline = Timeline::new("main");
        let shared = solid(FrameSpan::new(0, 10));
        let shared_id = shared.id();
        let mut upper = Track::video("V1");
        upper.add_clip(shared).expect("clip should insert");
        let upper_id = upper.id();
        timeline.add_track(upper).expect("first track should insert");

        let mut lower = Track::video("V2");
        lower
            .add_clip(solid(FrameSpan::new(50, 10)).with_id(shared_id))
            .expect("the track alone does not know about the timeline");

        match timeline.add_track(lower) {
            Err(TimelineError::ClipAlreadyOwned { clip, track }) => {
                assert_eq!(clip, shared_id);
                assert_eq!(track, upper_id);
            }
            other => panic!("shared clip id should be rejected, got {other:?}"),
        }
        assert_eq!(timeline.tracks().len(), 1);
    }

    #[test]
    fn owned_tracks_cannot_join_another_timeline() {
        let mut first = Timeline::new("a");
        let mut second = Timeline::new("b");
        first.add_track(Track::video("V1")).expect("track should insert");
        let track = first.remove_track_at(0).expect("track should be removable");

        let mut owned = track;
        owned.set_timeline(Some(first.id()));
        assert!(matches!(
            second.add_track(owned),
            Err(TimelineError::TrackAlreadyOwned { .. })
        ));
    }

    #[test]
    fn move_clip_between_tracks_uses_split_borrows() {
        let mut timeline = Timeline::new("main");
        timeline.add_track(Track::video("top")).expect("track should insert");
        timeline.add_track(Track::video("bottom")).expect("track should insert");
        let id = timeline
            .track_mut(1)
            .expect("track should exist")
            .add_clip(solid(FrameSpan::new(0, 30)))
            .expect("clip should insert");

        timeline.move_clip(1, 0, 0, 0).expect("move up should succeed");
        assert_eq!(timeline.find_clip(id).map(|(index, _)| index), Some(0));

        timeline.move_clip(0, 0, 1, 0).expect("move down should succeed");
        assert_eq!(timeline.find_clip(id).map(|(index, _)| index), Some(1));
        assert!(timeline.move_clip(1, 0, 2, 0).is_err());
    }

    #[test]
    fn frame_bounds_follow_clips() {
        let mut timeline = Timeline::new("main");
        assert_eq!(timeline.largest_frame_in_use(), 0);
        assert_eq!(timeline.used_frame_span(), None);

        timeline.add_track(Track::video("V1")).expect("track should insert");
        timeline.add_track(Track::video("V2")).expect("track should insert");
        timeline
            .track_mut(0)
            .expect("track should exist")
            .add_clip(solid(FrameSpan::new(20, 30)))
            .expect("clip should insert");
        timeline
            .track_mut(1)
            .expect("track should exist")
            .add_clip(solid(FrameSpan::new(400, 100)))
            .expect("clip should insert");

        assert_eq!(timeline.largest_frame_in_use(), 500);
        assert_eq!(timeline.used_frame_span(), Some(FrameSpan::from_index(20, 500)));
        assert_eq!(timeline.clip_count(), 2);
    }

    #[test]
    fn structural_edits_are_rejected_mid_render() {
        let mut timeline = Timeline::new("main");
        timeline.add_track(Track::video("V1")).expect("track should insert");
        timeline
            .track_mut(0)
            .expect("track should exist")
            .add_clip(solid(FrameSpan::new(0, 10)))
            .expect("clip should insert");

        assert!(
            timeline
                .begin_composite_render(5, &CancelToken::new())
                .expect("begin should succeed")
        );
        assert!(matches!(
            timeline.track_mut(0),
            Err(TimelineError::RenderInFlight)
        ));
        assert!(matches!(
            timeline.add_track(Track::video("V2")),
            Err(TimelineError::RenderInFlight)
        ));
        assert!(timeline.clear_tracks().is_err());
    }

    #[test]
    fn clear_tracks_empties_timeline() {
        let mut timeline = Timeline::new("main");
        for name in ["V1", "V2"] {
            timeline.add_track(Track::video(name)).expect("track should insert");
        }
        timeline
            .track_mut(1)
            .expect("track should exist")
            .add_clip(solid(FrameSpan::new(0, 10)))
            .expect("clip should insert");

        timeline.clear_tracks().expect("clear should succeed");
        assert!(timeline.tracks().is_empty());
        assert_eq!(timeline.clip_count(), 0);
    }

    #[test]
    fn play_head_is_clamped_to_duration() {
        let mut timeline = Timeline::new("main");
        timeline.set_max_duration(100);
        timeline.set_play_head(250);
        assert_eq!(timeline.play_head(), 100);
        timeline.set_max_duration(40);
        assert_eq!(timeline.play_head(), 40);
        timeline.set_play_head(-3);
        assert_eq!(timeline.play_head(), 0);
    }
}
