use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::clip::Effect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for FrameSize {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Self = Self::opaque(0, 0, 0);
    pub const WHITE: Self = Self::opaque(255, 255, 255);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }
}

/// Paint used to composite a translucent layer back onto its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerPaint {
    pub alpha: u8,
}

impl LayerPaint {
    #[must_use]
    pub fn from_opacity(opacity: f64) -> Self {
        Self {
            alpha: (opacity.clamp(0.0, 1.0) * 255.0).round() as u8,
        }
    }
}

/// Drawing target of the composite pipeline. Save counts follow the
/// save/restore-to-count model: `save` and `save_layer` return the depth to
/// pass back to `restore_to_count` to undo them.
pub trait RenderSurface: Send {
    fn frame_size(&self) -> FrameSize;

    fn save(&mut self) -> anyhow::Result<usize>;

    fn save_layer(&mut self, paint: &LayerPaint) -> anyhow::Result<usize>;

    fn restore_to_count(&mut self, count: usize) -> anyhow::Result<()>;

    fn fill(&mut self, color: Rgba) -> anyhow::Result<()>;

    fn apply_effect(&mut self, effect: &Effect, frame: i64, is_pre: bool) -> anyhow::Result<()>;
}

/// Applies a clip's effect list around its draw call.
pub trait EffectProcessor: Send + Sync {
    /// Runs `effects` in "pre" mode before the clip draws, or in "post" mode
    /// after it. Must accept an empty list.
    fn process_effect_list(
        &self,
        effects: &[Effect],
        frame: i64,
        surface: &mut dyn RenderSurface,
        frame_size: FrameSize,
        is_pre: bool,
    ) -> anyhow::Result<()>;
}

/// Forwards every enabled effect to [`RenderSurface::apply_effect`] in list
/// order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfaceEffects;

impl EffectProcessor for SurfaceEffects {
    fn process_effect_list(
        &self,
        effects: &[Effect],
        frame: i64,
        surface: &mut dyn RenderSurface,
        _frame_size: FrameSize,
        is_pre: bool,
    ) -> anyhow::Result<()> {
        for effect in effects.iter().filter(|effect| effect.enabled) {
            surface.apply_effect(effect, frame, is_pre)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SurfaceCommand {
    Save { depth: usize },
    SaveLayer { depth: usize, alpha: u8 },
    Restore { to: usize },
    Fill { color: Rgba },
    Effect { name: String, frame: i64, pre: bool },
}

/// Surface that records every call instead of rasterising. Used for
/// fingerprints, the CLI and tests.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    size: FrameSize,
    depth: usize,
    commands: Vec<SurfaceCommand>,
}

impl RecordingSurface {
    #[must_use]
    pub const fn new(size: FrameSize) -> Self {
        Self {
            size,
            depth: 1,
            commands: Vec::new(),
        }
    }

    /// Current save depth; a fresh surface starts at 1.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn commands(&self) -> &[SurfaceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<SurfaceCommand> {
        std::mem::take(&mut self.commands)
    }

    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, SurfaceCommand::SaveLayer { .. }))
            .count()
    }

    fn push_depth(&mut self) -> usize {
        let count = self.depth;
        self.depth += 1;
        count
    }
}

impl RenderSurface for RecordingSurface {
    fn frame_size(&self) -> FrameSize {
        self.size
    }

    fn save(&mut self) -> anyhow::Result<usize> {
        let depth = self.push_depth();
        self.commands.push(SurfaceCommand::Save { depth });
        Ok(depth)
    }

    fn save_layer(&mut self, paint: &LayerPaint) -> anyhow::Result<usize> {
        let depth = self.push_depth();
        self.commands.push(SurfaceCommand::SaveLayer {
            depth,
            alpha: paint.alpha,
        });
        Ok(depth)
    }

    fn restore_to_count(&mut self, count: usize) -> anyhow::Result<()> {
        if count == 0 || count > self.depth {
            bail!("cannot restore to save count {count} at depth {}", self.depth);
        }
        self.depth = count;
        self.commands.push(SurfaceCommand::Restore { to: count });
        Ok(())
    }

    fn fill(&mut self, color: Rgba) -> anyhow::Result<()> {
        self.commands.push(SurfaceCommand::Fill { color });
        Ok(())
    }

    fn apply_effect(&mut self, effect: &Effect, frame: i64, is_pre: bool) -> anyhow::Result<()> {
        self.commands.push(SurfaceCommand::Effect {
            name: effect.name.clone(),
            frame,
            pre: is_pre,
        });
        Ok(())
    }
}
