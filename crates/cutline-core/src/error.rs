use std::fmt;

use thiserror::Error;

use crate::{clip::ClipId, span::FrameSpan, timeline::TimelineId, track::TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpanError {
    #[error("end index {end} is out of range (begin is {begin})")]
    EndOutOfRange { begin: i64, end: i64 },
    #[error("begin {begin} is out of range (end index is {end})")]
    BeginOutOfRange { begin: i64, end: i64 },
    #[error("span {begin} + {duration} overflows the frame axis")]
    Overflow { begin: i64, duration: i64 },
}

/// Contract violations raised by structural operations on clips, tracks and
/// timelines. None of these are recoverable by retrying.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("clip {clip} already belongs to track {track}")]
    ClipAlreadyOwned { clip: ClipId, track: TrackId },
    #[error("clip {clip} is already a member of track {track}")]
    DuplicateClip { clip: ClipId, track: TrackId },
    #[error("track {track} does not accept {content} clip {clip}")]
    ClipRejected {
        track: TrackId,
        clip: ClipId,
        content: &'static str,
    },
    #[error("clip {0} has been disposed")]
    DisposedClip(ClipId),
    #[error("track {track} already belongs to timeline {timeline}")]
    TrackAlreadyOwned { track: TrackId, timeline: TimelineId },
    #[error("track {0} is already a member of this timeline")]
    DuplicateTrack(TrackId),
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("clip not found: {0}")]
    ClipNotFound(ClipId),
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),
    #[error("clips cannot move between tracks of different timelines")]
    CrossTimelineMove,
    #[error("structural change rejected while a composite render is in flight")]
    RenderInFlight,
    #[error("end_composite_render called in phase {0:?}")]
    RenderNotBegun(crate::render::RenderPhase),
    #[error("end_composite_render called for frame {requested}, render began at {began:?}")]
    RenderFrameMismatch { requested: i64, began: Option<i64> },
    #[error("span {span} covers {chunks} range cache chunks (limit {limit})")]
    SpanTooLong {
        span: FrameSpan,
        chunks: i64,
        limit: i64,
    },
    #[error("clip range cache inconsistency: {0}")]
    CacheInconsistency(String),
    #[error(transparent)]
    Span(#[from] SpanError),
}

/// Step of the composite pipeline a [`RenderError::Pipeline`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStage {
    BeginRender,
    Checkpoint,
    AdjustmentPre,
    OpenTrackLayer,
    OpenClipLayer,
    PreEffects,
    Draw,
    PostEffects,
    Finalize,
    CloseLayer,
    AdjustmentPost,
}

impl RenderStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeginRender => "begin-render",
            Self::Checkpoint => "checkpoint",
            Self::AdjustmentPre => "adjustment-pre",
            Self::OpenTrackLayer => "open-track-layer",
            Self::OpenClipLayer => "open-clip-layer",
            Self::PreEffects => "pre-effects",
            Self::Draw => "draw",
            Self::PostEffects => "post-effects",
            Self::Finalize => "finalize",
            Self::CloseLayer => "close-layer",
            Self::AdjustmentPost => "adjustment-post",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("a composite render is already in flight")]
    Busy,
    #[error("composite render cancelled at frame {frame}")]
    Cancelled {
        frame: i64,
        suppressed: Vec<anyhow::Error>,
    },
    #[error("{stage} failed for {} at frame {frame}", clip_label(.clip))]
    Pipeline {
        stage: RenderStage,
        clip: Option<ClipId>,
        frame: i64,
        #[source]
        source: anyhow::Error,
        suppressed: Vec<anyhow::Error>,
    },
    #[error(transparent)]
    Contract(#[from] TimelineError),
}

impl RenderError {
    /// Failures raised while completing the remaining clips after the primary
    /// error. They never replace the primary error.
    #[must_use]
    pub fn suppressed(&self) -> &[anyhow::Error] {
        match self {
            Self::Cancelled { suppressed, .. } | Self::Pipeline { suppressed, .. } => suppressed,
            Self::Busy | Self::Contract(_) => &[],
        }
    }

    #[must_use]
    pub const fn stage(&self) -> Option<RenderStage> {
        match self {
            Self::Pipeline { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

fn clip_label(clip: &Option<ClipId>) -> String {
    clip.map_or_else(|| "timeline".to_owned(), |id| format!("clip {id}"))
}

/// Every failure collected by a bulk teardown loop.
#[derive(Debug, Error)]
#[error("{message} ({} failure(s))", .errors.len())]
pub struct AggregateError {
    pub message: String,
    pub errors: Vec<anyhow::Error>,
}

impl AggregateError {
    pub(crate) fn check(
        message: impl Into<String>,
        errors: Vec<anyhow::Error>,
    ) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self {
                message: message.into(),
                errors,
            })
        }
    }
}
