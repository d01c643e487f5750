//! Two-phase composite render.
//!
//! [`Timeline::begin_composite_render`] selects, synchronously, the primary
//! clip of every visible video track at a frame. [`Timeline::end_composite_render`]
//! then draws the selection bottom track first, awaiting each clip's
//! `end_render` future in turn. Every selected clip receives exactly one
//! `on_render_completed` call whatever the outcome.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use anyhow::Context;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    clip::{Clip, ClipContent, ClipId},
    error::{AggregateError, RenderError, RenderStage, TimelineError},
    surface::{EffectProcessor, FrameSize, LayerPaint, RenderSurface},
    timeline::Timeline,
    track::{Track, TrackKind},
};

/// Cooperative cancellation flag shared between a render and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderPhase {
    #[default]
    Idle,
    Beginning,
    Began,
    Ending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RenderEntry {
    pub(crate) track: usize,
    pub(crate) clip: ClipId,
}

/// Per-frame selection. Buffers keep their capacity between frames.
#[derive(Debug, Default)]
pub(crate) struct RenderState {
    pub(crate) phase: RenderPhase,
    pub(crate) frame: Option<i64>,
    pub(crate) render_list: Vec<RenderEntry>,
    /// Adjustment clips, bottom-most first.
    pub(crate) adjustments: Vec<RenderEntry>,
}

impl RenderState {
    fn reset(&mut self) {
        self.phase = RenderPhase::Idle;
        self.frame = None;
        self.render_list.clear();
        self.adjustments.clear();
    }
}

/// Collaborators used by the draw phase.
pub struct RenderContext<'a> {
    pub surface: &'a mut dyn RenderSurface,
    pub effects: &'a dyn EffectProcessor,
}

impl<'a> RenderContext<'a> {
    pub fn new(surface: &'a mut dyn RenderSurface, effects: &'a dyn EffectProcessor) -> Self {
        Self { surface, effects }
    }
}

/// True when `opacity` is close enough to 1.0 to composite without a layer.
#[must_use]
pub fn is_opaque(opacity: f64, epsilon: f64) -> bool {
    (opacity - 1.0).abs() <= epsilon
}

/// A save checkpoint, translucent when the opacity calls for it.
#[derive(Debug)]
pub(crate) struct OpacityLayer {
    save_count: usize,
    paint: Option<LayerPaint>,
}

impl OpacityLayer {
    pub(crate) fn open(
        surface: &mut dyn RenderSurface,
        opacity: f64,
        force_plain: bool,
        epsilon: f64,
    ) -> anyhow::Result<Self> {
        if force_plain || is_opaque(opacity, epsilon) {
            return Ok(Self {
                save_count: surface.save()?,
                paint: None,
            });
        }
        let paint = LayerPaint::from_opacity(opacity);
        let save_count = surface.save_layer(&paint)?;
        Ok(Self {
            save_count,
            paint: Some(paint),
        })
    }

    pub(crate) fn close(mut self, surface: &mut dyn RenderSurface) -> anyhow::Result<()> {
        surface.restore_to_count(self.save_count)?;
        self.paint = None;
        Ok(())
    }
}

enum Selection {
    Skip,
    Draw,
    Adjustment,
    Failed(anyhow::Error),
}

impl Timeline {
    /// Selects the clips to composite at `frame`.
    ///
    /// Returns `Ok(false)` without side effects when a render is already in
    /// flight, and `Ok(false)` after completing every selected clip as
    /// cancelled when `cancel` fires. If any of those completions fail, the
    /// failures come back in [`RenderError::Cancelled`] instead.
    #[instrument(skip(self, cancel), fields(timeline_id = %self.id))]
    pub fn begin_composite_render(
        &mut self,
        frame: i64,
        cancel: &CancelToken,
    ) -> Result<bool, RenderError> {
        if self.render_state.phase != RenderPhase::Idle {
            debug!(phase = ?self.render_state.phase, "begin rejected, render in flight");
            return Ok(false);
        }
        self.render_state.phase = RenderPhase::Beginning;
        let epsilon = self.options.opacity_epsilon;

        for track_index in (0..self.tracks.len()).rev() {
            if cancel.is_cancelled() {
                let failures = complete_entries(
                    &mut self.tracks,
                    &self.render_state.render_list,
                    frame,
                    true,
                );
                info!(
                    selected = self.render_state.render_list.len(),
                    failures = failures.len(),
                    "composite render cancelled while selecting clips"
                );
                self.render_state.reset();
                if failures.is_empty() {
                    return Ok(false);
                }
                return Err(RenderError::Cancelled {
                    frame,
                    suppressed: failures,
                });
            }

            let track = &mut self.tracks[track_index];
            if track.kind() != TrackKind::Video || !track.is_effectively_visible(epsilon) {
                continue;
            }
            let Some(clip_id) = track.primary_clip_id_at(frame) else {
                continue;
            };
            let track_id = track.id();
            let Some(clip) = track.clip_mut(clip_id) else {
                let violation = TimelineError::CacheInconsistency(format!(
                    "range cache of track {track_id} references unknown clip {clip_id}"
                ));
                self.abandon_selection(frame);
                return Err(violation.into());
            };
            if !clip.is_render_enabled() || clip.is_disposed() {
                continue;
            }

            let selection = match clip.content_mut() {
                ClipContent::Adjustment => Selection::Adjustment,
                ClipContent::Visual(renderer) => match renderer.begin_render(frame) {
                    Ok(true) => Selection::Draw,
                    Ok(false) => Selection::Skip,
                    Err(source) => Selection::Failed(source),
                },
                ClipContent::Audio(_) => Selection::Skip,
            };
            let entry = RenderEntry {
                track: track_index,
                clip: clip_id,
            };
            match selection {
                Selection::Skip => {}
                Selection::Draw => self.render_state.render_list.push(entry),
                Selection::Adjustment => self.render_state.adjustments.push(entry),
                Selection::Failed(source) => {
                    let suppressed = self.abandon_selection(frame);
                    error!(clip_id = %clip_id, error = %source, "clip failed to begin render");
                    return Err(RenderError::Pipeline {
                        stage: RenderStage::BeginRender,
                        clip: Some(clip_id),
                        frame,
                        source,
                        suppressed,
                    });
                }
            }
        }

        self.render_state.phase = RenderPhase::Began;
        self.render_state.frame = Some(frame);
        debug!(
            clips = self.render_state.render_list.len(),
            adjustments = self.render_state.adjustments.len(),
            "composite render began"
        );
        Ok(true)
    }

    /// Draws the clips selected by [`Timeline::begin_composite_render`].
    ///
    /// The render state is reset on every exit, including when the returned
    /// future is dropped before completion.
    #[instrument(skip(self, ctx, cancel), fields(timeline_id = %self.id))]
    pub async fn end_composite_render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        frame: i64,
        cancel: &CancelToken,
    ) -> Result<(), RenderError> {
        if self.render_state.phase != RenderPhase::Began {
            return Err(TimelineError::RenderNotBegun(self.render_state.phase).into());
        }
        if self.render_state.frame != Some(frame) {
            return Err(TimelineError::RenderFrameMismatch {
                requested: frame,
                began: self.render_state.frame,
            }
            .into());
        }

        self.render_state.phase = RenderPhase::Ending;
        let started = Instant::now();
        let epsilon = self.options.opacity_epsilon;
        let result = {
            let mut pass = RenderPass {
                tracks: self.tracks.as_mut_slice(),
                state: &mut self.render_state,
                frame,
                completed: 0,
            };
            pass.run(ctx, cancel, epsilon).await
        };

        match &result {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.last_render_duration = Some(elapsed);
                debug!(elapsed_us = elapsed.as_micros(), "composite render finished");
            }
            Err(error) => warn!(error = %error, "composite render did not finish"),
        }
        result
    }

    /// Runs both phases. A begin rejected by cancellation maps to
    /// [`RenderError::Cancelled`].
    pub async fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        frame: i64,
        cancel: &CancelToken,
    ) -> Result<(), RenderError> {
        if self.is_rendering() {
            return Err(RenderError::Busy);
        }
        if !self.begin_composite_render(frame, cancel)? {
            return Err(RenderError::Cancelled {
                frame,
                suppressed: Vec::new(),
            });
        }
        self.end_composite_render(ctx, frame, cancel).await
    }

    /// Abandons a begun render without drawing. Every selected clip is
    /// completed as cancelled.
    pub fn cancel_composite_render(&mut self) -> Result<(), AggregateError> {
        if self.render_state.phase != RenderPhase::Began {
            return Ok(());
        }
        let frame = self.render_state.frame.unwrap_or_default();
        let errors = self.abandon_selection(frame);
        AggregateError::check(format!("failed to cancel render of frame {frame}"), errors)
    }

    fn abandon_selection(&mut self, frame: i64) -> Vec<anyhow::Error> {
        let errors =
            complete_entries(&mut self.tracks, &self.render_state.render_list, frame, true);
        self.render_state.reset();
        errors
    }
}

struct RenderPass<'t> {
    tracks: &'t mut [Track],
    state: &'t mut RenderState,
    frame: i64,
    /// Entries of the render list before this index have been completed.
    completed: usize,
}

impl RenderPass<'_> {
    async fn run(
        &mut self,
        ctx: &mut RenderContext<'_>,
        cancel: &CancelToken,
        epsilon: f64,
    ) -> Result<(), RenderError> {
        let base = ctx
            .surface
            .save()
            .map_err(|source| self.fail(RenderStage::Checkpoint, None, source))?;
        let result = self.composite(ctx, cancel, epsilon).await;
        let restored = ctx.surface.restore_to_count(base);
        match (result, restored) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(source)) => Err(self.fail(RenderStage::Checkpoint, None, source)),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(restore)) => {
                warn!(error = %restore, "failed to restore base checkpoint");
                Err(error)
            }
        }
    }

    async fn composite(
        &mut self,
        ctx: &mut RenderContext<'_>,
        cancel: &CancelToken,
        epsilon: f64,
    ) -> Result<(), RenderError> {
        let frame_size = ctx.surface.frame_size();
        if let Err(source) = self.apply_adjustments(ctx, frame_size, true) {
            return Err(self.fail(RenderStage::AdjustmentPre, None, source));
        }

        for index in 0..self.state.render_list.len() {
            if cancel.is_cancelled() {
                let remaining = self.state.render_list.len() - index;
                let suppressed = self.complete_remaining(true);
                info!(frame = self.frame, remaining, "composite render cancelled");
                return Err(RenderError::Cancelled {
                    frame: self.frame,
                    suppressed,
                });
            }
            self.render_clip(index, ctx, frame_size, epsilon).await?;
        }

        if let Err(source) = self.apply_adjustments(ctx, frame_size, false) {
            return Err(self.fail(RenderStage::AdjustmentPost, None, source));
        }
        Ok(())
    }

    async fn render_clip(
        &mut self,
        index: usize,
        ctx: &mut RenderContext<'_>,
        frame_size: FrameSize,
        epsilon: f64,
    ) -> Result<(), RenderError> {
        let entry = self.state.render_list[index];
        let frame = self.frame;
        let (track_opacity, clip_opacity, custom_opacity) = {
            let track = self.track(entry)?;
            let clip = track
                .clip(entry.clip)
                .ok_or(TimelineError::ClipNotFound(entry.clip))?;
            (
                track.opacity(),
                clip.effective_opacity(frame),
                clip.renderer()
                    .is_some_and(|renderer| renderer.uses_custom_opacity()),
            )
        };

        let track_layer = OpacityLayer::open(&mut *ctx.surface, track_opacity, false, epsilon)
            .map_err(|source| self.fail(RenderStage::OpenTrackLayer, Some(entry.clip), source))?;
        let clip_layer =
            OpacityLayer::open(&mut *ctx.surface, clip_opacity, custom_opacity, epsilon)
                .map_err(|source| {
                    self.fail(RenderStage::OpenClipLayer, Some(entry.clip), source)
                })?;

        let pre = ctx.effects.process_effect_list(
            self.clip(entry)?.effects(),
            frame,
            &mut *ctx.surface,
            frame_size,
            true,
        );
        if let Err(source) = pre {
            return Err(self.fail(RenderStage::PreEffects, Some(entry.clip), source));
        }

        let drawn = match self.clip_mut(entry)?.renderer_mut() {
            Some(renderer) => renderer.end_render(&mut *ctx.surface, frame).await,
            None => Ok(()),
        };
        if let Err(source) = drawn {
            return Err(self.fail(RenderStage::Draw, Some(entry.clip), source));
        }

        let post = ctx.effects.process_effect_list(
            self.clip(entry)?.effects(),
            frame,
            &mut *ctx.surface,
            frame_size,
            false,
        );
        if let Err(source) = post {
            // The clip itself drew, so it completes as not cancelled.
            let suppressed = self.complete_next(false).into_iter().collect();
            return Err(self.fail_with(
                RenderStage::PostEffects,
                Some(entry.clip),
                source,
                suppressed,
            ));
        }

        if let Some(source) = self.complete_next(false) {
            return Err(self.fail(RenderStage::Finalize, Some(entry.clip), source));
        }

        let closed = clip_layer
            .close(&mut *ctx.surface)
            .and_then(|()| track_layer.close(&mut *ctx.surface));
        if let Err(source) = closed {
            return Err(self.fail(RenderStage::CloseLayer, Some(entry.clip), source));
        }
        Ok(())
    }

    /// Adjustment effects wrap the whole composite: "pre" bottom to top,
    /// "post" top to bottom.
    fn apply_adjustments(
        &self,
        ctx: &mut RenderContext<'_>,
        frame_size: FrameSize,
        is_pre: bool,
    ) -> anyhow::Result<()> {
        let mut apply = |entry: &RenderEntry| -> anyhow::Result<()> {
            let clip = self.clip(*entry)?;
            ctx.effects
                .process_effect_list(
                    clip.effects(),
                    self.frame,
                    &mut *ctx.surface,
                    frame_size,
                    is_pre,
                )
                .with_context(|| format!("adjustment clip {} failed", entry.clip))
        };
        if is_pre {
            self.state.adjustments.iter().try_for_each(&mut apply)
        } else {
            self.state.adjustments.iter().rev().try_for_each(&mut apply)
        }
    }

    fn track(&self, entry: RenderEntry) -> Result<&Track, TimelineError> {
        self.tracks
            .get(entry.track)
            .ok_or(TimelineError::IndexOutOfRange {
                index: entry.track,
                len: self.tracks.len(),
            })
    }

    fn clip(&self, entry: RenderEntry) -> Result<&Clip, TimelineError> {
        self.track(entry)?
            .clip(entry.clip)
            .ok_or(TimelineError::ClipNotFound(entry.clip))
    }

    fn clip_mut(&mut self, entry: RenderEntry) -> Result<&mut Clip, TimelineError> {
        self.tracks
            .get_mut(entry.track)
            .and_then(|track| track.clip_mut(entry.clip))
            .ok_or(TimelineError::ClipNotFound(entry.clip))
    }

    /// Completes the next uncompleted clip and returns its failure, if any.
    fn complete_next(&mut self, cancelled: bool) -> Option<anyhow::Error> {
        let entry = *self.state.render_list.get(self.completed)?;
        self.completed += 1;
        complete_entry(self.tracks, entry, self.frame, cancelled).err()
    }

    fn complete_remaining(&mut self, cancelled: bool) -> Vec<anyhow::Error> {
        let mut errors = Vec::new();
        while self.completed < self.state.render_list.len() {
            errors.extend(self.complete_next(cancelled));
        }
        errors
    }

    fn fail(
        &mut self,
        stage: RenderStage,
        clip: Option<ClipId>,
        source: anyhow::Error,
    ) -> RenderError {
        self.fail_with(stage, clip, source, Vec::new())
    }

    fn fail_with(
        &mut self,
        stage: RenderStage,
        clip: Option<ClipId>,
        source: anyhow::Error,
        mut suppressed: Vec<anyhow::Error>,
    ) -> RenderError {
        suppressed.extend(self.complete_remaining(true));
        error!(
            stage = %stage,
            clip_id = ?clip,
            frame = self.frame,
            error = %source,
            suppressed = suppressed.len(),
            "composite render failed"
        );
        RenderError::Pipeline {
            stage,
            clip,
            frame: self.frame,
            source,
            suppressed,
        }
    }
}

impl Drop for RenderPass<'_> {
    fn drop(&mut self) {
        let remaining = self.state.render_list.len().saturating_sub(self.completed);
        if remaining > 0 {
            let failures = self.complete_remaining(true);
            warn!(
                frame = self.frame,
                remaining,
                failures = failures.len(),
                "render pass ended early, remaining clips completed as cancelled"
            );
        }
        self.state.reset();
    }
}

fn complete_entry(
    tracks: &mut [Track],
    entry: RenderEntry,
    frame: i64,
    cancelled: bool,
) -> anyhow::Result<()> {
    let renderer = tracks
        .get_mut(entry.track)
        .and_then(|track| track.clip_mut(entry.clip))
        .and_then(Clip::renderer_mut)
        .ok_or(TimelineError::ClipNotFound(entry.clip))?;
    renderer
        .on_render_completed(frame, cancelled)
        .with_context(|| format!("clip {} failed to complete frame {frame}", entry.clip))
}

fn complete_entries(
    tracks: &mut [Track],
    entries: &[RenderEntry],
    frame: i64,
    cancelled: bool,
) -> Vec<anyhow::Error> {
    entries
        .iter()
        .filter_map(|entry| complete_entry(tracks, *entry, frame, cancelled).err())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{RecordingSurface, SurfaceCommand};

    #[test]
    fn opaque_tolerance_is_inclusive() {
        assert!(is_opaque(1.0, 1e-4));
        assert!(is_opaque(0.99995, 1e-4));
        assert!(!is_opaque(0.999, 1e-4));
    }

    #[test]
    fn opacity_layer_uses_plain_save_when_opaque_or_forced() {
        let mut surface = RecordingSurface::new(FrameSize::new(8, 8));
        let plain = OpacityLayer::open(&mut surface, 1.0, false, 1e-4).expect("save should work");
        let forced = OpacityLayer::open(&mut surface, 0.2, true, 1e-4).expect("save should work");
        let layered =
            OpacityLayer::open(&mut surface, 0.5, false, 1e-4).expect("layer should work");
        layered.close(&mut surface).expect("close should work");
        forced.close(&mut surface).expect("close should work");
        plain.close(&mut surface).expect("close should work");

        assert_eq!(
            surface.commands(),
            &[
                SurfaceCommand::Save { depth: 1 },
                SurfaceCommand::Save { depth: 2 },
                SurfaceCommand::SaveLayer {
                    depth: 3,
                    alpha: 128
                },
                SurfaceCommand::Restore { to: 3 },
                SurfaceCommand::Restore { to: 2 },
                SurfaceCommand::Restore { to: 1 },
            ]
        );
        assert_eq!(surface.depth(), 1);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
