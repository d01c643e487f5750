use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::{
    builtin::ClipFactory,
    cache::ClipRangeCache,
    clip::{AudioSource, AutomationLane, Clip, ClipContent, ClipId, Effect},
    span::FrameSpan,
    timeline::{Timeline, TimelineId, TimelineOptions},
    track::{Track, TrackId, TrackKind},
};

pub const DOCUMENT_SCHEMA_VERSION: u32 = 1;

const fn default_schema_version() -> u32 {
    DOCUMENT_SCHEMA_VERSION
}

const fn default_true() -> bool {
    true
}

const fn default_opacity() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineDocument {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: TimelineId,
    pub name: String,
    #[serde(default)]
    pub play_head: i64,
    #[serde(default)]
    pub max_duration: i64,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub tracks: Vec<TrackDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackDocument {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default)]
    pub clips: Vec<ClipDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipDocument {
    pub id: ClipId,
    pub name: String,
    pub span: FrameSpan,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_true")]
    pub render_enabled: bool,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub automation: Vec<AutomationLane>,
    pub content: ClipContentDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClipContentDocument {
    Visual {
        factory_id: String,
        #[serde(default)]
        state: Map<String, Value>,
    },
    Adjustment,
    Audio {
        source: AudioSource,
    },
}

impl Clip {
    #[must_use]
    pub fn write(&self) -> ClipDocument {
        let content = match self.content() {
            ClipContent::Visual(renderer) => ClipContentDocument::Visual {
                factory_id: renderer.factory_id().to_owned(),
                state: renderer.write_state(),
            },
            ClipContent::Adjustment => ClipContentDocument::Adjustment,
            ClipContent::Audio(source) => ClipContentDocument::Audio {
                source: source.clone(),
            },
        };
        ClipDocument {
            id: self.id(),
            name: self.name().to_owned(),
            span: self.span(),
            opacity: self.opacity(),
            render_enabled: self.is_render_enabled(),
            effects: self.effects().to_vec(),
            automation: self.automation().to_vec(),
            content,
        }
    }

    /// Rebuilds a detached clip. Visual renderers come from `factory`.
    pub fn read(document: ClipDocument, factory: &dyn ClipFactory) -> Result<Self> {
        let content = match document.content {
            ClipContentDocument::Visual { factory_id, state } => {
                let renderer = factory
                    .create_renderer(&factory_id, &state)
                    .with_context(|| {
                        format!("failed to rebuild renderer of clip {}", document.id)
                    })?;
                ClipContent::Visual(renderer)
            }
            ClipContentDocument::Adjustment => ClipContent::Adjustment,
            ClipContentDocument::Audio { source } => ClipContent::Audio(source),
        };

        let mut clip = Self::new(document.name, document.span, content).with_id(document.id);
        clip.set_opacity(document.opacity);
        clip.set_render_enabled(document.render_enabled);
        *clip.effects_mut() = document.effects;
        *clip.automation_mut() = document
            .automation
            .iter()
            .map(|lane| AutomationLane::new(lane.parameter(), lane.points().iter().copied()))
            .collect();
        Ok(clip)
    }
}

impl Track {
    #[must_use]
    pub fn write(&self) -> TrackDocument {
        TrackDocument {
            id: self.id(),
            name: self.name().to_owned(),
            kind: self.kind(),
            visible: self.is_visible(),
            opacity: self.opacity(),
            clips: self.clips().map(Clip::write).collect(),
        }
    }

    /// Rebuilds a detached track. Clips are inserted one by one so the range
    /// cache and back-references are rebuilt from scratch.
    pub fn read(
        document: TrackDocument,
        factory: &dyn ClipFactory,
        chunk_shift: u32,
    ) -> Result<Self> {
        let mut track = Self::with_cache(
            document.name,
            document.kind,
            ClipRangeCache::with_chunk_shift(chunk_shift),
        )
        .with_id(document.id);
        track.set_visible(document.visible);
        track.set_opacity(document.opacity);

        for clip in document.clips {
            let clip_id = clip.id;
            track.add_clip(Clip::read(clip, factory)?).with_context(|| {
                format!("failed to insert clip {clip_id} into track {}", document.id)
            })?;
        }
        Ok(track)
    }
}

impl Timeline {
    #[must_use]
    pub fn write(&self) -> TimelineDocument {
        TimelineDocument {
            schema_version: DOCUMENT_SCHEMA_VERSION,
            id: self.id(),
            name: self.name().to_owned(),
            play_head: self.play_head(),
            max_duration: self.max_duration(),
            saved_at: Utc::now(),
            tracks: self.tracks().iter().map(Track::write).collect(),
        }
    }

    /// Rebuilds a timeline. The max duration grows to cover every clip.
    pub fn read(
        document: TimelineDocument,
        factory: &dyn ClipFactory,
        options: TimelineOptions,
    ) -> Result<Self> {
        if document.schema_version > DOCUMENT_SCHEMA_VERSION {
            anyhow::bail!(
                "unsupported timeline schema version {} (newest supported is {})",
                document.schema_version,
                DOCUMENT_SCHEMA_VERSION
            );
        }

        let mut timeline = Self::with_options(document.name, options);
        timeline.id = document.id;
        for track in document.tracks {
            let track_id = track.id;
            let track = Track::read(track, factory, options.chunk_shift)?;
            timeline
                .add_track(track)
                .with_context(|| format!("failed to add track {track_id}"))?;
        }

        let max_duration = document.max_duration.max(timeline.largest_frame_in_use());
        timeline.set_max_duration(max_duration);
        timeline.set_play_head(document.play_head);
        Ok(timeline)
    }
}

#[instrument(skip(document), fields(timeline_id = %document.id, path = %path.display()))]
pub fn save_document(path: &Path, document: &TimelineDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(document).context("failed to serialize timeline")?;
    let mut temp_file = tempfile::NamedTempFile::new_in(
        path.parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf),
    )
    .context("failed to create temp timeline file")?;
    temp_file
        .write_all(&json)
        .context("failed to write temp timeline file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist timeline: {}", path.display()))?;

    info!(bytes = json.len(), "timeline saved");
    Ok(())
}

#[instrument(fields(path = %path.display()))]
pub fn load_document(path: &Path) -> Result<TimelineDocument> {
    let content =
        fs::read(path).with_context(|| format!("failed to read timeline: {}", path.display()))?;
    let document: TimelineDocument =
        serde_json::from_slice(&content).context("invalid timeline json")?;
    debug!(timeline_id = %document.id, tracks = document.tracks.len(), "timeline document parsed");
    Ok(document)
}

pub fn save_timeline(path: &Path, timeline: &Timeline) -> Result<()> {
    save_document(path, &timeline.write())
}

#[instrument(skip(factory), fields(path = %path.display()))]
pub fn load_timeline(
    path: &Path,
    factory: &dyn ClipFactory,
    options: TimelineOptions,
) -> Result<Timeline> {
    let timeline = Timeline::read(load_document(path)?, factory, options)?;
    info!(
        timeline_id = %timeline.id(),
        tracks = timeline.tracks().len(),
        clips = timeline.clip_count(),
        "timeline loaded"
    );
    Ok(timeline)
}

#[instrument(
    skip(timeline),
    fields(timeline_id = %timeline.id(), autosave_dir = %autosave_dir.display())
)]
pub fn autosave_timeline(timeline: &Timeline, autosave_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(autosave_dir).with_context(|| {
        format!(
            "failed to create autosave directory: {}",
            autosave_dir.display()
        )
    })?;

    let autosave_path = autosave_dir.join(format!("{}.autosave.cutline.json", timeline.id()));
    save_timeline(&autosave_path, timeline)?;
    debug!(path = %autosave_path.display(), "autosave complete");
    Ok(autosave_path)
}
