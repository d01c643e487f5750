use anyhow::{Context, anyhow};
use futures::future::{self, BoxFuture};
use serde_json::{Map, Value};

use crate::{
    clip::ClipRenderer,
    surface::{RenderSurface, Rgba},
};

pub const SOLID_COLOR_FACTORY_ID: &str = "solid_color";

/// Rebuilds clip renderers from their persisted factory id and state.
pub trait ClipFactory {
    fn create_renderer(
        &self,
        factory_id: &str,
        state: &Map<String, Value>,
    ) -> anyhow::Result<Box<dyn ClipRenderer>>;
}

/// Factory for the renderers shipped with this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinClipFactory;

impl ClipFactory for BuiltinClipFactory {
    fn create_renderer(
        &self,
        factory_id: &str,
        state: &Map<String, Value>,
    ) -> anyhow::Result<Box<dyn ClipRenderer>> {
        match factory_id {
            SOLID_COLOR_FACTORY_ID => Ok(Box::new(SolidColorRenderer::from_state(state)?)),
            other => Err(anyhow!("unknown clip factory id: {other}")),
        }
    }
}

/// Fills the whole surface with one colour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolidColorRenderer {
    color: Rgba,
    prepared: Option<i64>,
}

impl SolidColorRenderer {
    #[must_use]
    pub const fn new(color: Rgba) -> Self {
        Self {
            color,
            prepared: None,
        }
    }

    #[must_use]
    pub const fn color(&self) -> Rgba {
        self.color
    }

    fn from_state(state: &Map<String, Value>) -> anyhow::Result<Self> {
        let color = state
            .get("color")
            .cloned()
            .context("solid colour state is missing `color`")?;
        let color = serde_json::from_value(color).context("invalid solid colour")?;
        Ok(Self::new(color))
    }
}

impl ClipRenderer for SolidColorRenderer {
    fn factory_id(&self) -> &'static str {
        SOLID_COLOR_FACTORY_ID
    }

    fn begin_render(&mut self, frame: i64) -> anyhow::Result<bool> {
        if self.color.a == 0 {
            return Ok(false);
        }
        self.prepared = Some(frame);
        Ok(true)
    }

    fn end_render<'a>(
        &'a mut self,
        surface: &'a mut dyn RenderSurface,
        frame: i64,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let result = match self.prepared {
            Some(prepared) if prepared == frame => surface.fill(self.color),
            prepared => Err(anyhow!(
                "solid colour prepared for {prepared:?}, asked to draw frame {frame}"
            )),
        };
        Box::pin(future::ready(result))
    }

    fn on_render_completed(&mut self, _frame: i64, _cancelled: bool) -> anyhow::Result<()> {
        self.prepared = None;
        Ok(())
    }

    fn write_state(&self) -> Map<String, Value> {
        let mut state = Map::new();
        state.insert(
            "color".to_owned(),
            serde_json::to_value(self.color).unwrap_or(Value::Null),
        );
        state
    }

    fn clone_renderer(&self) -> Box<dyn ClipRenderer> {
        Box::new(Self::new(self.color))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{FrameSize, RecordingSurface, SurfaceCommand};

    #[test]
    fn factory_restores_written_state() {
        let renderer = SolidColorRenderer::new(Rgba::new(10, 20, 30, 200));
        let restored = BuiltinClipFactory
            .create_renderer(renderer.factory_id(), &renderer.write_state())
            .expect("factory should rebuild the renderer");
        assert_eq!(restored.factory_id(), SOLID_COLOR_FACTORY_ID);
        assert_eq!(restored.write_state(), renderer.write_state());
    }

    #[test]
    fn unknown_factory_ids_are_errors() {
        let error = BuiltinClipFactory
            .create_renderer("video_file", &Map::new())
            .expect_err("unknown id should fail");
        assert!(error.to_string().contains("video_file"));
        assert!(
            BuiltinClipFactory
                .create_renderer(SOLID_COLOR_FACTORY_ID, &Map::new())
                .is_err()
        );
    }

    #[test]
    fn transparent_colour_skips_the_frame() {
        let mut renderer = SolidColorRenderer::new(Rgba::new(0, 0, 0, 0));
        assert!(!renderer.begin_render(0).expect("begin should not fail"));
    }

    #[test]
    fn draws_only_the_prepared_frame() {
        let mut renderer = SolidColorRenderer::new(Rgba::WHITE);
        let mut surface = RecordingSurface::new(FrameSize::default());
        assert!(renderer.begin_render(4).expect("begin should not fail"));

        futures::executor::block_on(renderer.end_render(&mut surface, 4))
            .expect("prepared frame should draw");
        assert_eq!(
            surface.commands(),
            &[SurfaceCommand::Fill {
                color: Rgba::WHITE
            }]
        );
        assert!(futures::executor::block_on(renderer.end_render(&mut surface, 5)).is_err());
    }
}
