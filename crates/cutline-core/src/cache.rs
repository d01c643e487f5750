use std::{collections::BTreeMap, ops::RangeInclusive};

use tracing::trace;

use crate::{
    clip::ClipId,
    error::{SpanError, TimelineError},
    span::FrameSpan,
};

pub const DEFAULT_CHUNK_SHIFT: u32 = 7;
pub const MIN_CHUNK_SHIFT: u32 = 1;
pub const MAX_CHUNK_SHIFT: u32 = 20;
/// Upper bound on the number of chunks one clip may be registered in.
pub const MAX_CHUNKS_PER_CLIP: i64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedClip {
    pub id: ClipId,
    pub span: FrameSpan,
}

/// Buckets clips into fixed-size frame chunks so the topmost clip at a frame
/// can be found without scanning the whole track.
///
/// A clip is registered in every chunk its span overlaps. Within a chunk,
/// registration order is significant: later entries sit above earlier ones.
#[derive(Debug, Clone)]
pub struct ClipRangeCache {
    chunk_shift: u32,
    chunks: BTreeMap<i64, Vec<CachedClip>>,
    len: usize,
    smallest_active_frame: i64,
    largest_active_frame: i64,
    previous_smallest_active_frame: i64,
    previous_largest_active_frame: i64,
}

impl Default for ClipRangeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipRangeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_shift(DEFAULT_CHUNK_SHIFT)
    }

    /// Chunk size is `1 << chunk_shift` frames; the shift is clamped to
    /// `MIN_CHUNK_SHIFT..=MAX_CHUNK_SHIFT`.
    #[must_use]
    pub fn with_chunk_shift(chunk_shift: u32) -> Self {
        Self {
            chunk_shift: chunk_shift.clamp(MIN_CHUNK_SHIFT, MAX_CHUNK_SHIFT),
            chunks: BTreeMap::new(),
            len: 0,
            smallest_active_frame: 0,
            largest_active_frame: 0,
            previous_smallest_active_frame: 0,
            previous_largest_active_frame: 0,
        }
    }

    #[must_use]
    pub const fn chunk_shift(&self) -> u32 {
        self.chunk_shift
    }

    #[must_use]
    pub const fn chunk_size(&self) -> i64 {
        1 << self.chunk_shift
    }

    /// Floor division of `frame` by the chunk size; negative frames land in
    /// negative chunks.
    #[must_use]
    pub const fn chunk_index(&self, frame: i64) -> i64 {
        frame >> self.chunk_shift
    }

    /// Chunks covered by `span`. Empty and negative-duration spans occupy the
    /// single chunk containing `begin`.
    #[must_use]
    pub fn chunk_range(&self, span: FrameSpan) -> RangeInclusive<i64> {
        let last_frame = span.begin.max(span.end().saturating_sub(1));
        self.chunk_index(span.begin)..=self.chunk_index(last_frame)
    }

    /// Rejects spans whose end does not fit in an `i64` or that would occupy
    /// more than [`MAX_CHUNKS_PER_CLIP`] chunks.
    pub fn check_span(&self, span: FrameSpan) -> Result<(), TimelineError> {
        let end = span.checked_end().ok_or(SpanError::Overflow {
            begin: span.begin,
            duration: span.duration,
        })?;
        let last_frame = span.begin.max(end.saturating_sub(1));
        let chunks = self.chunk_index(last_frame) - self.chunk_index(span.begin) + 1;
        if chunks > MAX_CHUNKS_PER_CLIP {
            return Err(TimelineError::SpanTooLong {
                span,
                chunks,
                limit: MAX_CHUNKS_PER_CLIP,
            });
        }
        Ok(())
    }

    /// Number of distinct clips registered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn smallest_active_frame(&self) -> i64 {
        self.smallest_active_frame
    }

    #[must_use]
    pub const fn largest_active_frame(&self) -> i64 {
        self.largest_active_frame
    }

    #[must_use]
    pub const fn previous_smallest_active_frame(&self) -> i64 {
        self.previous_smallest_active_frame
    }

    #[must_use]
    pub const fn previous_largest_active_frame(&self) -> i64 {
        self.previous_largest_active_frame
    }

    pub fn add(&mut self, id: ClipId, span: FrameSpan) -> Result<(), TimelineError> {
        self.check_span(span)?;
        let range = self.chunk_range(span);
        for chunk in range.clone() {
            if self
                .chunks
                .get(&chunk)
                .is_some_and(|entries| entries.iter().any(|entry| entry.id == id))
            {
                return Err(inconsistency(format!(
                    "clip {id} is already registered in chunk {chunk}"
                )));
            }
        }

        for chunk in range {
            self.chunks
                .entry(chunk)
                .or_default()
                .push(CachedClip { id, span });
        }

        if self.len == 0 {
            self.set_bounds(span.begin, span.end());
        } else {
            self.set_bounds(
                self.smallest_active_frame.min(span.begin),
                self.largest_active_frame.max(span.end()),
            );
        }
        self.len += 1;
        trace!(clip_id = %id, span = %span, "clip registered in range cache");
        Ok(())
    }

    /// Unregisters `id` from every chunk derived from `span`, which must be the
    /// span the clip was registered with.
    pub fn remove(&mut self, span: FrameSpan, id: ClipId) -> Result<(), TimelineError> {
        let range = self.chunk_range(span);
        self.ensure_registered(id, range.clone())?;
        for chunk in range {
            self.unregister(chunk, id);
        }
        self.len = self.len.saturating_sub(1);
        self.recompute_bounds();
        trace!(clip_id = %id, span = %span, "clip removed from range cache");
        Ok(())
    }

    pub fn on_span_changed(
        &mut self,
        id: ClipId,
        old_span: FrameSpan,
        new_span: FrameSpan,
    ) -> Result<(), TimelineError> {
        if old_span == new_span {
            return Ok(());
        }
        self.check_span(new_span)?;

        let old_range = self.chunk_range(old_span);
        let new_range = self.chunk_range(new_span);
        self.ensure_registered(id, old_range.clone())?;

        if old_range == new_range {
            for chunk in old_range {
                if let Some(entry) = self
                    .chunks
                    .get_mut(&chunk)
                    .and_then(|entries| entries.iter_mut().find(|entry| entry.id == id))
                {
                    entry.span = new_span;
                }
            }
        } else {
            for chunk in old_range {
                self.unregister(chunk, id);
            }
            for chunk in new_range {
                self.chunks.entry(chunk).or_default().push(CachedClip {
                    id,
                    span: new_span,
                });
            }
        }

        self.recompute_bounds();
        Ok(())
    }

    /// Topmost clip intersecting `frame`; the most recently registered entry
    /// of the chunk wins.
    #[must_use]
    pub fn get_primary_at(&self, frame: i64) -> Option<ClipId> {
        self.chunks
            .get(&self.chunk_index(frame))?
            .iter()
            .rev()
            .find(|entry| entry.span.intersects_frame(frame))
            .map(|entry| entry.id)
    }

    /// Every clip intersecting `frame`, topmost first.
    #[must_use]
    pub fn clips_at_frame(&self, frame: i64) -> Vec<ClipId> {
        self.chunks
            .get(&self.chunk_index(frame))
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .filter(|entry| entry.span.intersects_frame(frame))
                    .map(|entry| entry.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every clip intersecting `span`, each reported once. Within a chunk the
    /// topmost clip comes first; chunks are visited in frame order.
    #[must_use]
    pub fn clips_in_span(&self, span: FrameSpan) -> Vec<ClipId> {
        let mut found = Vec::new();
        for entries in self.chunks.range(self.chunk_range(span)).map(|(_, entries)| entries) {
            for entry in entries.iter().rev() {
                if entry.span.intersects(&span) && !found.contains(&entry.id) {
                    found.push(entry.id);
                }
            }
        }
        found
    }

    #[must_use]
    pub fn is_region_empty(&self, span: FrameSpan) -> bool {
        !self
            .chunks
            .range(self.chunk_range(span))
            .flat_map(|(_, entries)| entries.iter())
            .any(|entry| entry.span.intersects(&span))
    }

    /// Moves `id` to the top of every chunk it occupies. Other clips keep
    /// their relative order.
    pub fn make_topmost(&mut self, id: ClipId, span: FrameSpan) -> Result<(), TimelineError> {
        let range = self.chunk_range(span);
        self.ensure_registered(id, range.clone())?;
        for chunk in range {
            let Some(entries) = self.chunks.get_mut(&chunk) else {
                continue;
            };
            if let Some(index) = entries.iter().position(|entry| entry.id == id) {
                let entry = entries.remove(index);
                entries.push(entry);
            }
        }
        Ok(())
    }

    fn ensure_registered(
        &self,
        id: ClipId,
        range: RangeInclusive<i64>,
    ) -> Result<(), TimelineError> {
        for chunk in range {
            let Some(entries) = self.chunks.get(&chunk) else {
                return Err(inconsistency(format!(
                    "expected chunk {chunk} to exist for clip {id}"
                )));
            };
            if !entries.iter().any(|entry| entry.id == id) {
                return Err(inconsistency(format!(
                    "expected clip {id} to be registered in chunk {chunk}"
                )));
            }
        }
        Ok(())
    }

    fn unregister(&mut self, chunk: i64, id: ClipId) {
        if let Some(entries) = self.chunks.get_mut(&chunk) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                self.chunks.remove(&chunk);
            }
        }
    }

    fn recompute_bounds(&mut self) {
        let smallest = self
            .chunks
            .first_key_value()
            .and_then(|(_, entries)| entries.iter().map(|entry| entry.span.begin).min());
        let largest = self
            .chunks
            .last_key_value()
            .and_then(|(_, entries)| entries.iter().map(|entry| entry.span.end()).max());
        self.set_bounds(smallest.unwrap_or(0), largest.unwrap_or(0));
    }

    fn set_bounds(&mut self, smallest: i64, largest: i64) {
        self.previous_smallest_active_frame = self.smallest_active_frame;
        self.smallest_active_frame = smallest;
        self.previous_largest_active_frame = self.largest_active_frame;
        self.largest_active_frame = largest;
    }
}

fn inconsistency(message: String) -> TimelineError {
    TimelineError::CacheInconsistency(message)
}
