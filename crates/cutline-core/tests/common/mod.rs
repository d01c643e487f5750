#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{anyhow, bail};
use cutline_core::{
    CancelToken, Clip, ClipRenderer, Effect, EffectProcessor, FrameSize, FrameSpan, RenderSurface,
    Rgba, SurfaceEffects, Timeline, Track,
};
use futures::{
    FutureExt,
    future::{self, BoxFuture},
};
use parking_lot::Mutex;

pub const FAIL_PRE_EFFECT: &str = "fail_pre";
pub const FAIL_POST_EFFECT: &str = "fail_post";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin {
        clip: &'static str,
        frame: i64,
    },
    Draw {
        clip: &'static str,
        frame: i64,
    },
    Completed {
        clip: &'static str,
        frame: i64,
        cancelled: bool,
    },
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

#[must_use]
pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[must_use]
pub fn events(log: &EventLog) -> Vec<Event> {
    log.lock().clone()
}

/// `(clip, cancelled)` for every completion, in call order.
#[must_use]
pub fn completions(log: &EventLog) -> Vec<(&'static str, bool)> {
    log.lock()
        .iter()
        .filter_map(|event| match event {
            Event::Completed {
                clip, cancelled, ..
            } => Some((*clip, *cancelled)),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Draw,
    Decline,
    FailBegin,
    FailDraw,
    FailComplete,
    /// `end_render` never resolves.
    Stall,
}

/// Renderer that records every hook call into a shared log.
#[derive(Debug, Clone)]
pub struct ProbeRenderer {
    label: &'static str,
    log: EventLog,
    behavior: Behavior,
    custom_opacity: bool,
    cancel_on_begin: Option<CancelToken>,
    cancel_on_draw: Option<CancelToken>,
}

impl ProbeRenderer {
    #[must_use]
    pub fn new(label: &'static str, log: &EventLog) -> Self {
        Self {
            label,
            log: Arc::clone(log),
            behavior: Behavior::Draw,
            custom_opacity: false,
            cancel_on_begin: None,
            cancel_on_draw: None,
        }
    }

    #[must_use]
    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    #[must_use]
    pub fn with_custom_opacity(mut self) -> Self {
        self.custom_opacity = true;
        self
    }

    #[must_use]
    pub fn cancelling_on_begin(mut self, token: &CancelToken) -> Self {
        self.cancel_on_begin = Some(token.clone());
        self
    }

    #[must_use]
    pub fn cancelling_on_draw(mut self, token: &CancelToken) -> Self {
        self.cancel_on_draw = Some(token.clone());
        self
    }

    #[must_use]
    pub fn into_clip(self, span: FrameSpan) -> Clip {
        Clip::visual(self.label, span, self)
    }

    fn record(&self, event: Event) {
        self.log.lock().push(event);
    }
}

impl ClipRenderer for ProbeRenderer {
    fn factory_id(&self) -> &'static str {
        "probe"
    }

    fn begin_render(&mut self, frame: i64) -> anyhow::Result<bool> {
        self.record(Event::Begin {
            clip: self.label,
            frame,
        });
        if let Some(token) = &self.cancel_on_begin {
            token.cancel();
        }
        match self.behavior {
            Behavior::FailBegin => bail!("{} refused to begin", self.label),
            Behavior::Decline => Ok(false),
            _ => Ok(true),
        }
    }

    fn end_render<'a>(
        &'a mut self,
        surface: &'a mut dyn RenderSurface,
        frame: i64,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        self.record(Event::Draw {
            clip: self.label,
            frame,
        });
        if let Some(token) = &self.cancel_on_draw {
            token.cancel();
        }
        match self.behavior {
            Behavior::FailDraw => {
                future::ready(Err(anyhow!("{} failed to draw", self.label))).boxed()
            }
            Behavior::Stall => future::pending().boxed(),
            _ => future::ready(surface.fill(Rgba::WHITE)).boxed(),
        }
    }

    fn on_render_completed(&mut self, frame: i64, cancelled: bool) -> anyhow::Result<()> {
        self.record(Event::Completed {
            clip: self.label,
            frame,
            cancelled,
        });
        if self.behavior == Behavior::FailComplete {
            bail!("{} failed to complete", self.label);
        }
        Ok(())
    }

    fn uses_custom_opacity(&self) -> bool {
        self.custom_opacity
    }

    fn clone_renderer(&self) -> Box<dyn ClipRenderer> {
        Box::new(self.clone())
    }
}

/// Forwards to [`SurfaceEffects`] but fails on the `fail_pre`/`fail_post`
/// marker effects in the matching mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedEffects;

impl EffectProcessor for ScriptedEffects {
    fn process_effect_list(
        &self,
        effects: &[Effect],
        frame: i64,
        surface: &mut dyn RenderSurface,
        frame_size: FrameSize,
        is_pre: bool,
    ) -> anyhow::Result<()> {
        let marker = if is_pre {
            FAIL_PRE_EFFECT
        } else {
            FAIL_POST_EFFECT
        };
        if effects.iter().any(|effect| effect.name == marker) {
            bail!("{marker} effect failed at frame {frame}");
        }
        SurfaceEffects.process_effect_list(effects, frame, surface, frame_size, is_pre)
    }
}

#[must_use]
pub fn video_track(name: &str, clips: impl IntoIterator<Item = Clip>) -> Track {
    let mut track = Track::video(name);
    for clip in clips {
        track
            .add_clip(clip)
            .expect("test clip should be accepted by a video track");
    }
    track
}

/// Timeline whose first track is the topmost one.
#[must_use]
pub fn timeline_with(tracks: impl IntoIterator<Item = Track>) -> Timeline {
    let mut timeline = Timeline::new("test timeline");
    timeline.set_max_duration(10_000);
    for track in tracks {
        timeline
            .add_track(track)
            .expect("test track should be accepted");
    }
    timeline
}

#[must_use]
pub fn small_frame() -> FrameSize {
    FrameSize::new(64, 36)
}
