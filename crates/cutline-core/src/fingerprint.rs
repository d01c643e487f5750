use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{
    error::RenderError,
    render::{CancelToken, RenderContext},
    span::FrameSpan,
    surface::{FrameSize, RecordingSurface, SurfaceCommand, SurfaceEffects},
    timeline::Timeline,
    track::Track,
};

const FINGERPRINT_SCHEMA_VERSION: u32 = 1;

/// Digest of everything a timeline draws over a frame range. Two timelines
/// with equal reports composite identically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FingerprintReport {
    pub schema_version: u32,
    pub timeline_id: String,
    pub track_count: usize,
    pub clip_count: usize,
    pub frames: FrameSpan,
    pub command_count: usize,
    pub layer_count: usize,
    pub structure_hash: String,
    pub render_hash: String,
}

/// Composites a single frame onto a fresh [`RecordingSurface`].
pub fn record_frame(
    timeline: &mut Timeline,
    frame: i64,
    frame_size: FrameSize,
) -> Result<Vec<SurfaceCommand>, RenderError> {
    let mut surface = RecordingSurface::new(frame_size);
    let mut ctx = RenderContext::new(&mut surface, &SurfaceEffects);
    futures::executor::block_on(timeline.render(&mut ctx, frame, &CancelToken::new()))?;
    Ok(surface.take_commands())
}

#[instrument(skip(timeline), fields(timeline_id = %timeline.id()))]
pub fn render_fingerprint(
    timeline: &mut Timeline,
    frames: FrameSpan,
    frame_size: FrameSize,
) -> Result<FingerprintReport> {
    let tracks: Vec<_> = timeline.tracks().iter().map(Track::write).collect();
    let structure_bytes = serde_json::to_vec(&tracks).context("failed to serialize tracks")?;

    let mut hasher = Sha256::new();
    let mut command_count = 0;
    let mut layer_count = 0;
    for frame in frames.begin..frames.end() {
        let commands = record_frame(timeline, frame, frame_size)
            .with_context(|| format!("failed to render frame {frame}"))?;
        command_count += commands.len();
        layer_count += commands
            .iter()
            .filter(|command| matches!(command, SurfaceCommand::SaveLayer { .. }))
            .count();
        hasher.update(frame.to_le_bytes());
        hasher.update(serde_json::to_vec(&commands).context("failed to serialize commands")?);
    }

    Ok(FingerprintReport {
        schema_version: FINGERPRINT_SCHEMA_VERSION,
        timeline_id: timeline.id().to_string(),
        track_count: timeline.tracks().len(),
        clip_count: timeline.clip_count(),
        frames,
        command_count,
        layer_count,
        structure_hash: hash_hex(&structure_bytes),
        render_hash: format!("{:x}", hasher.finalize()),
    })
}

pub fn read_fingerprint_report(path: &Path) -> Result<FingerprintReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read fingerprint report: {}", path.display()))?;
    let report: FingerprintReport =
        serde_json::from_slice(&bytes).context("failed to parse fingerprint report json")?;
    Ok(report)
}

pub fn write_fingerprint_report(path: &Path, report: &FingerprintReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create fingerprint directory: {}", parent.display())
        })?;
    }

    let json =
        serde_json::to_vec_pretty(report).context("failed to encode fingerprint report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write fingerprint report: {}", path.display()))?;
    Ok(())
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
