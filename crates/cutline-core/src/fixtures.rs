use uuid::Uuid;

use crate::{
    builtin::SolidColorRenderer,
    clip::{
        AudioSource, AutomationLane, AutomationPoint, Clip, ClipId, Effect, OPACITY_PARAMETER,
    },
    span::FrameSpan,
    surface::Rgba,
    timeline::{Timeline, TimelineId, TimelineOptions},
    track::{TrackId, TrackKind},
};

fn fixed(id: &str) -> Uuid {
    Uuid::parse_str(id).expect("fixture id should be valid")
}

fn fixed_effect(id: &str, name: &str) -> Effect {
    Effect {
        id: fixed(id),
        ..Effect::new(name)
    }
}

/// Four-track timeline used by the CLI and the fingerprint tests:
///
/// - `Overlay` (top): a half-transparent lower third with a shadow effect.
/// - `Grade`: an adjustment clip grading everything beneath it.
/// - `Background`: a backdrop plus a short flash that fades out.
/// - `Music`: an audio bed, ignored by the compositor.
#[must_use]
pub fn demo_timeline() -> Timeline {
    demo_timeline_with_options(TimelineOptions::default())
}

#[must_use]
pub fn demo_timeline_with_options(options: TimelineOptions) -> Timeline {
    let mut timeline = Timeline::with_options("Cutline Demo", options);
    timeline.id = TimelineId::from_uuid(fixed("5f0c7a5e-8d0b-4c55-9a43-0b8f4f2d6a11"));
    timeline.set_max_duration(240);

    let mut overlay = timeline
        .create_track("Overlay", TrackKind::Video)
        .with_id(TrackId::from_uuid(fixed("0d6b2f9c-3f51-4a8e-b6d4-62f0d1c0a7e2")));
    overlay
        .add_clip(
            Clip::visual(
                "Lower third",
                FrameSpan::new(48, 96),
                SolidColorRenderer::new(Rgba::opaque(255, 200, 0)),
            )
            .with_id(ClipId::from_uuid(fixed("7c1f4b0e-2a9d-4e3b-8f6a-1d5c9e7b3a20")))
            .with_opacity(0.5)
            .with_effect(
                fixed_effect("b2e8d4c6-9a1f-4f7e-8c3d-5a6b7c8d9e01", "drop_shadow")
                    .with_param("radius", 6.0),
            ),
        )
        .expect("fixture overlay clip should insert");

    let mut grade = timeline
        .create_track("Grade", TrackKind::Video)
        .with_id(TrackId::from_uuid(fixed("4a9e1c7d-6b2f-4d8a-9e3c-7f1b5d2a8c34")));
    grade
        .add_clip(
            Clip::adjustment("Warm grade", FrameSpan::new(0, 240))
                .with_id(ClipId::from_uuid(fixed("9e3d5b7f-1c4a-4e6b-8d2f-3a5c7e9b1d46")))
                .with_effect(
                    fixed_effect("c4f6a8b0-2d3e-4f5a-9b6c-7d8e9f0a1b23", "color_grade")
                        .with_param("strength", 0.7),
                ),
        )
        .expect("fixture grade clip should insert");

    let mut background = timeline
        .create_track("Background", TrackKind::Video)
        .with_id(TrackId::from_uuid(fixed("e1b3d5f7-9a2c-4e4b-8d6f-0a2c4e6b8d59")));
    background
        .add_clip(
            Clip::visual(
                "Backdrop",
                FrameSpan::new(0, 240),
                SolidColorRenderer::new(Rgba::opaque(16, 16, 24)),
            )
            .with_id(ClipId::from_uuid(fixed("2b4d6f8a-0c1e-4a3b-9c5d-7e9f1a3b5c68"))),
        )
        .expect("fixture backdrop clip should insert");
    background
        .add_clip(
            Clip::visual("Flash", FrameSpan::new(120, 12), SolidColorRenderer::new(Rgba::WHITE))
                .with_id(ClipId::from_uuid(fixed("6d8f0a2c-4e5b-4c7d-8e9f-1a3b5c7d9e7a")))
                .with_automation(AutomationLane::new(
                    OPACITY_PARAMETER,
                    [
                        AutomationPoint {
                            frame: 0,
                            value: 1.0,
                        },
                        AutomationPoint {
                            frame: 11,
                            value: 0.0,
                        },
                    ],
                )),
        )
        .expect("fixture flash clip should insert");

    let mut music = timeline
        .create_track("Music", TrackKind::Audio)
        .with_id(TrackId::from_uuid(fixed("8f0a2c4e-6b7d-4e9f-a1b3-c5d7e9f1a38b")));
    music
        .add_clip(
            Clip::audio(
                "Theme",
                FrameSpan::new(0, 240),
                AudioSource {
                    path: "audio/theme.wav".to_string(),
                    gain_db: -6.0,
                },
            )
            .with_id(ClipId::from_uuid(fixed("a1c3e5f7-8b9d-4f1a-b2c4-d6e8f0a2c49c"))),
        )
        .expect("fixture music clip should insert");

    for track in [overlay, grade, background, music] {
        timeline
            .add_track(track)
            .expect("fixture track should insert");
    }
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_timeline_is_stable() {
        let first = demo_timeline();
        let second = demo_timeline();
        assert_eq!(first.id(), second.id());
        assert_eq!(first.tracks().len(), 4);
        assert_eq!(first.clip_count(), 5);
        assert_eq!(first.largest_frame_in_use(), 240);
        assert_eq!(
            first.track(2).and_then(|track| track.clip_at_frame(125)).map(Clip::name),
            Some("Flash")
        );
    }
}
