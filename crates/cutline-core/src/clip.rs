use std::{collections::BTreeMap, fmt};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{span::FrameSpan, surface::RenderSurface, track::TrackId};

/// Automation lane name that drives a clip's opacity.
pub const OPACITY_PARAMETER: &str = "opacity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(Uuid);

impl ClipId {
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

impl Default for ClipId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Effect {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

impl Effect {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AutomationPoint {
    pub frame: i64,
    pub value: f64,
}

/// Keyframed values of one parameter. Frames are relative to the clip's
/// begin and points are kept sorted by frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationLane {
    parameter: String,
    points: Vec<AutomationPoint>,
}

impl AutomationLane {
    #[must_use]
    pub fn new(
        parameter: impl Into<String>,
        points: impl IntoIterator<Item = AutomationPoint>,
    ) -> Self {
        let mut points: Vec<_> = points.into_iter().collect();
        points.sort_by_key(|point| point.frame);
        Self {
            parameter: parameter.into(),
            points,
        }
    }

    #[must_use]
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    #[must_use]
    pub fn points(&self) -> &[AutomationPoint] {
        &self.points
    }

    /// Inserts a point, replacing any existing point at the same frame.
    pub fn insert_point(&mut self, frame: i64, value: f64) {
        match self.points.binary_search_by_key(&frame, |point| point.frame) {
            Ok(index) => self.points[index].value = value,
            Err(index) => self.points.insert(index, AutomationPoint { frame, value }),
        }
    }

    /// Linearly interpolated value; held flat before the first and after the
    /// last point. `None` when the lane has no points.
    #[must_use]
    pub fn value_at(&self, frame: i64) -> Option<f64> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if frame <= first.frame {
            return Some(first.value);
        }
        if frame >= last.frame {
            return Some(last.value);
        }

        let next = self.points.partition_point(|point| point.frame <= frame);
        let (a, b) = (self.points[next - 1], self.points[next]);
        let t = (frame as f64 - a.frame as f64) / (b.frame as f64 - a.frame as f64);
        Some((b.value - a.value).mul_add(t, a.value))
    }
}

/// Render hooks of a visual clip.
///
/// For every clip selected in the begin phase, `on_render_completed` is
/// called exactly once, with `cancelled` set when the clip was not drawn to
/// completion.
pub trait ClipRenderer: Send + fmt::Debug {
    /// Key used by a [`crate::builtin::ClipFactory`] to rebuild the renderer.
    fn factory_id(&self) -> &'static str;

    /// Prepares the clip for `frame`. Returning `false` leaves the clip out of
    /// this frame's composite.
    fn begin_render(&mut self, frame: i64) -> anyhow::Result<bool>;

    fn end_render<'a>(
        &'a mut self,
        surface: &'a mut dyn RenderSurface,
        frame: i64,
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    fn on_render_completed(&mut self, frame: i64, cancelled: bool) -> anyhow::Result<()>;

    /// Renderers that apply opacity themselves always get a plain checkpoint
    /// instead of a translucent layer.
    fn uses_custom_opacity(&self) -> bool {
        false
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn write_state(&self) -> Map<String, Value> {
        Map::new()
    }

    fn clone_renderer(&self) -> Box<dyn ClipRenderer>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioSource {
    pub path: String,
    #[serde(default)]
    pub gain_db: f32,
}

#[derive(Debug)]
pub enum ClipContent {
    Visual(Box<dyn ClipRenderer>),
    /// Contributes its effects to every clip rendered beneath it.
    Adjustment,
    Audio(AudioSource),
}

impl ClipContent {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Visual(_) => "visual",
            Self::Adjustment => "adjustment",
            Self::Audio(_) => "audio",
        }
    }
}

impl Clone for ClipContent {
    fn clone(&self) -> Self {
        match self {
            Self::Visual(renderer) => Self::Visual(renderer.clone_renderer()),
            Self::Adjustment => Self::Adjustment,
            Self::Audio(source) => Self::Audio(source.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipCloneOptions {
    pub effects: bool,
    pub automation: bool,
}

impl Default for ClipCloneOptions {
    fn default() -> Self {
        Self {
            effects: true,
            automation: true,
        }
    }
}

#[derive(Debug)]
pub struct Clip {
    id: ClipId,
    name: String,
    span: FrameSpan,
    opacity: f64,
    render_enabled: bool,
    effects: Vec<Effect>,
    automation: Vec<AutomationLane>,
    track: Option<TrackId>,
    disposed: bool,
    content: ClipContent,
}

impl Clip {
    #[must_use]
    pub fn new(name: impl Into<String>, span: FrameSpan, content: ClipContent) -> Self {
        Self {
            id: ClipId::new(),
            name: name.into(),
            span,
            opacity: 1.0,
            render_enabled: true,
            effects: Vec::new(),
            automation: Vec::new(),
            track: None,
            disposed: false,
            content,
        }
    }

    #[must_use]
    pub fn visual(
        name: impl Into<String>,
        span: FrameSpan,
        renderer: impl ClipRenderer + 'static,
    ) -> Self {
        Self::new(name, span, ClipContent::Visual(Box::new(renderer)))
    }

    #[must_use]
    pub fn adjustment(name: impl Into<String>, span: FrameSpan) -> Self {
        Self::new(name, span, ClipContent::Adjustment)
    }

    #[must_use]
    pub fn audio(name: impl Into<String>, span: FrameSpan, source: AudioSource) -> Self {
        Self::new(name, span, ClipContent::Audio(source))
    }

    #[must_use]
    pub fn with_id(mut self, id: ClipId) -> Self {
        self.id = id;
        self
    }

    /// Replaces the span of a clip that is not yet on a track. Attached clips
    /// change span through [`crate::track::Track::set_clip_span`].
    #[must_use]
    pub fn with_span(mut self, span: FrameSpan) -> Self {
        if self.track.is_none() {
            self.span = span;
        }
        self
    }

    #[must_use]
    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.set_opacity(opacity);
        self
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_automation(mut self, lane: AutomationLane) -> Self {
        self.automation.push(lane);
        self
    }

    #[must_use]
    pub const fn id(&self) -> ClipId {
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
    pub const fn span(&self) -> FrameSpan {
        self.span
    }

    #[must_use]
    pub const fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    #[must_use]
    pub const fn is_render_enabled(&self) -> bool {
        self.render_enabled
    }

    pub fn set_render_enabled(&mut self, enabled: bool) {
        self.render_enabled = enabled;
    }

    #[must_use]
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut Vec<Effect> {
        &mut self.effects
    }

    #[must_use]
    pub fn automation(&self) -> &[AutomationLane] {
        &self.automation
    }

    pub fn automation_mut(&mut self) -> &mut Vec<AutomationLane> {
        &mut self.automation
    }

    #[must_use]
    pub fn automation_lane(&self, parameter: &str) -> Option<&AutomationLane> {
        self.automation
            .iter()
            .find(|lane| lane.parameter() == parameter)
    }

    /// Track this clip belongs to. Only track operations change it.
    #[must_use]
    pub const fn track(&self) -> Option<TrackId> {
        self.track
    }

    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        self.disposed
    }

    #[must_use]
    pub const fn content(&self) -> &ClipContent {
        &self.content
    }

    #[must_use]
    pub const fn is_adjustment(&self) -> bool {
        matches!(self.content, ClipContent::Adjustment)
    }

    #[must_use]
    pub fn renderer(&self) -> Option<&dyn ClipRenderer> {
        match &self.content {
            ClipContent::Visual(renderer) => Some(renderer.as_ref()),
            ClipContent::Adjustment | ClipContent::Audio(_) => None,
        }
    }

    #[must_use]
    pub const fn intersects_frame(&self, frame: i64) -> bool {
        self.span.intersects_frame(frame)
    }

    /// Opacity at a timeline frame: the automated `opacity` lane when the clip
    /// has one, otherwise the static opacity.
    #[must_use]
    pub fn effective_opacity(&self, frame: i64) -> f64 {
        self.automation_lane(OPACITY_PARAMETER)
            .and_then(|lane| lane.value_at(frame.saturating_sub(self.span.begin)))
            .map_or(self.opacity, |value| value.clamp(0.0, 1.0))
    }

    /// Detached copy with a fresh id. Effects get fresh ids when copied.
    #[must_use]
    pub fn duplicate(&self, options: ClipCloneOptions) -> Self {
        let effects = if options.effects {
            self.effects
                .iter()
                .map(|effect| Effect {
                    id: Uuid::new_v4(),
                    ..effect.clone()
                })
                .collect()
        } else {
            Vec::new()
        };
        let automation = if options.automation {
            self.automation.clone()
        } else {
            Vec::new()
        };

        Self {
            id: ClipId::new(),
            name: self.name.clone(),
            span: self.span,
            opacity: self.opacity,
            render_enabled: self.render_enabled,
            effects,
            automation,
            track: None,
            disposed: false,
            content: self.content.clone(),
        }
    }

    /// Releases renderer resources. Safe to call more than once.
    pub fn dispose(&mut self) -> anyhow::Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        debug!(clip_id = %self.id, "clip disposed");
        match &mut self.content {
            ClipContent::Visual(renderer) => renderer.dispose(),
            ClipContent::Adjustment | ClipContent::Audio(_) => Ok(()),
        }
    }

    pub(crate) fn set_span(&mut self, span: FrameSpan) {
        self.span = span;
    }

    pub(crate) fn set_track(&mut self, track: Option<TrackId>) {
        self.track = track;
    }

    pub(crate) fn content_mut(&mut self) -> &mut ClipContent {
        &mut self.content
    }

    pub(crate) fn renderer_mut(&mut self) -> Option<&mut dyn ClipRenderer> {
        match &mut self.content {
            ClipContent::Visual(renderer) => Some(renderer.as_mut()),
            ClipContent::Adjustment | ClipContent::Audio(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opacity_lane(points: &[(i64, f64)]) -> AutomationLane {
        AutomationLane::new(
            OPACITY_PARAMETER,
            points
                .iter()
                .map(|&(frame, value)| AutomationPoint { frame, value }),
        )
    }

    #[test]
    fn automation_interpolates_between_points() {
        let lane = opacity_lane(&[(10, 1.0), (0, 0.0)]);
        assert_eq!(lane.points()[0].frame, 0);
        assert_eq!(lane.value_at(-5), Some(0.0));
        assert_eq!(lane.value_at(5), Some(0.5));
        assert_eq!(lane.value_at(20), Some(1.0));
        assert_eq!(AutomationLane::new("x", []).value_at(0), None);
    }

    #[test]
    fn insert_point_replaces_same_frame() {
        let mut lane = opacity_lane(&[(0, 0.0), (10, 1.0)]);
        lane.insert_point(10, 0.25);
        lane.insert_point(5, 0.5);
        let frames: Vec<_> = lane.points().iter().map(|point| point.frame).collect();
        assert_eq!(frames, vec![0, 5, 10]);
        assert_eq!(lane.value_at(10), Some(0.25));
    }

    #[test]
    fn effective_opacity_reads_automation_relative_to_clip() {
        let clip = Clip::adjustment("fade", FrameSpan::new(100, 20))
            .with_opacity(0.3)
            .with_automation(opacity_lane(&[(0, 0.0), (10, 1.0)]));
        assert!((clip.effective_opacity(105) - 0.5).abs() < 1e-9);
        assert!((clip.effective_opacity(119) - 1.0).abs() < 1e-9);

        let plain = Clip::adjustment("plain", FrameSpan::new(0, 10)).with_opacity(0.3);
        assert!((plain.effective_opacity(5) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn duplicate_honours_clone_options() {
        let clip = Clip::adjustment("grade", FrameSpan::new(0, 10))
            .with_effect(Effect::new("lut").with_param("strength", 0.8))
            .with_automation(opacity_lane(&[(0, 1.0)]));

        let full = clip.duplicate(ClipCloneOptions::default());
        assert_ne!(full.id(), clip.id());
        assert_eq!(full.effects().len(), 1);
        assert_ne!(full.effects()[0].id, clip.effects()[0].id);
        assert_eq!(full.effects()[0].params, clip.effects()[0].params);
        assert_eq!(full.automation().len(), 1);

        let bare = clip.duplicate(ClipCloneOptions {
            effects: false,
            automation: false,
        });
        assert!(bare.effects().is_empty());
        assert!(bare.automation().is_empty());
        assert_eq!(bare.track(), None);
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut clip = Clip::audio(
            "kick",
            FrameSpan::new(0, 4),
            AudioSource {
                path: "kick.wav".to_owned(),
                gain_db: 0.0,
            },
        );
        clip.dispose().expect("first dispose should succeed");
        clip.dispose().expect("second dispose should be a no-op");
        assert!(clip.is_disposed());
        assert_eq!(clip.content().label(), "audio");
    }
}
