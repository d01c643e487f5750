pub mod builtin;
pub mod cache;
pub mod clip;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fingerprint;
pub mod fixtures;
pub mod persistence;
pub mod render;
pub mod span;
pub mod surface;
pub mod timeline;
pub mod track;

pub use builtin::{BuiltinClipFactory, ClipFactory, SOLID_COLOR_FACTORY_ID, SolidColorRenderer};
pub use cache::{CachedClip, ClipRangeCache, DEFAULT_CHUNK_SHIFT};
pub use clip::{
    AudioSource, AutomationLane, AutomationPoint, Clip, ClipCloneOptions, ClipContent, ClipId,
    ClipRenderer, Effect, OPACITY_PARAMETER,
};
pub use config::EngineConfig;
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use error::{AggregateError, RenderError, RenderStage, SpanError, TimelineError};
pub use fingerprint::{FingerprintReport, record_frame, render_fingerprint};
pub use render::{CancelToken, RenderContext, RenderPhase};
pub use span::FrameSpan;
pub use surface::{
    EffectProcessor, FrameSize, LayerPaint, RecordingSurface, RenderSurface, Rgba, SurfaceCommand,
    SurfaceEffects,
};
pub use timeline::{Timeline, TimelineId, TimelineOptions};
pub use track::{Track, TrackCloneOptions, TrackId, TrackKind};
