use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SpanError;

/// A half-open slice of the frame axis, `[begin, begin + duration)`.
///
/// Neither field is validated: negative begins and durations are allowed and
/// every consumer in this crate handles them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSpan {
    pub begin: i64,
    pub duration: i64,
}

impl FrameSpan {
    pub const EMPTY: Self = Self::new(0, 0);

    #[must_use]
    pub const fn new(begin: i64, duration: i64) -> Self {
        Self { begin, duration }
    }

    /// Builds a span from an inclusive begin and an exclusive end.
    #[must_use]
    pub const fn from_index(begin: i64, end: i64) -> Self {
        Self::new(begin, end - begin)
    }

    /// Exclusive end frame, saturating at the bounds of `i64`.
    #[must_use]
    pub const fn end(&self) -> i64 {
        self.begin.saturating_add(self.duration)
    }

    /// Exclusive end frame, or `None` when it does not fit in an `i64`.
    #[must_use]
    pub const fn checked_end(&self) -> Option<i64> {
        self.begin.checked_add(self.duration)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.duration == 0
    }

    /// Grows both edges outward by `amount` frames.
    #[must_use]
    pub const fn expand(&self, amount: i64) -> Self {
        Self::new(self.begin - amount, self.duration + amount + amount)
    }

    /// Shrinks both edges inward by `amount` frames.
    #[must_use]
    pub const fn contract(&self, amount: i64) -> Self {
        Self::new(self.begin + amount, self.duration - amount - amount)
    }

    #[must_use]
    pub const fn offset_begin(&self, amount: i64) -> Self {
        Self::new(self.begin + amount, self.duration)
    }

    #[must_use]
    pub const fn offset_duration(&self, amount: i64) -> Self {
        Self::new(self.begin, self.duration + amount)
    }

    #[must_use]
    pub const fn offset(&self, begin: i64, duration: i64) -> Self {
        Self::new(self.begin + begin, self.duration + duration)
    }

    #[must_use]
    pub const fn with_begin(&self, begin: i64) -> Self {
        Self::new(begin, self.duration)
    }

    #[must_use]
    pub const fn with_duration(&self, duration: i64) -> Self {
        Self::new(self.begin, duration)
    }

    /// Keeps `begin` fixed and moves the end index.
    pub fn with_end(&self, end: i64) -> Result<Self, SpanError> {
        if end < self.begin {
            return Err(SpanError::EndOutOfRange {
                begin: self.begin,
                end,
            });
        }
        Ok(Self::from_index(self.begin, end))
    }

    /// Like [`FrameSpan::with_end`], but collapses to an empty span instead of
    /// failing and never moves the end past `upper_limit`.
    #[must_use]
    pub fn with_end_clamped(&self, end: i64, upper_limit: i64) -> Self {
        if end > self.begin {
            Self::from_index(self.begin, end.min(upper_limit))
        } else {
            self.with_duration(0)
        }
    }

    /// Keeps the end index fixed and moves `begin`.
    pub fn move_begin(&self, begin: i64) -> Result<Self, SpanError> {
        let end = self.end();
        if begin > end {
            return Err(SpanError::BeginOutOfRange { begin, end });
        }
        Ok(Self::from_index(begin, end))
    }

    #[must_use]
    pub fn move_begin_clamped(&self, begin: i64, lower_limit: i64) -> Self {
        let end = self.end();
        let begin = begin.max(lower_limit);
        if begin < end {
            Self::from_index(begin, end)
        } else {
            Self::new(end, 0)
        }
    }

    /// Smallest span covering both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: Self) -> Self {
        Self::from_index(self.begin.min(other.begin), self.end().max(other.end()))
    }

    /// Covering span of every input, or `None` when the iterator is empty.
    pub fn union_all(spans: impl IntoIterator<Item = Self>) -> Option<Self> {
        spans.into_iter().reduce(|range, span| range.union(span))
    }

    /// Restricts this span to `limit`.
    #[must_use]
    pub fn clamp(&self, limit: Self) -> Self {
        Self::from_index(self.begin.max(limit.begin), self.end().min(limit.end()))
    }

    #[must_use]
    pub const fn intersects_frame(&self, frame: i64) -> bool {
        frame >= self.begin && frame < self.end()
    }

    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        self.begin < other.end() && self.end() > other.begin
    }
}

impl fmt::Display for FrameSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{} ({})", self.begin, self.end(), self.duration)
    }
}
