use cutline_core::{
    FrameSize, FrameSpan, SurfaceCommand,
    fingerprint::{read_fingerprint_report, write_fingerprint_report},
    fixtures::demo_timeline,
    record_frame, render_fingerprint,
};

const FRAMES: FrameSpan = FrameSpan::new(0, 240);

fn frame_size() -> FrameSize {
    FrameSize::new(320, 180)
}

#[test]
fn fingerprint_is_stable_across_fresh_timelines() {
    let first = render_fingerprint(&mut demo_timeline(), FRAMES, frame_size())
        .expect("first fingerprint should render");
    let second = render_fingerprint(&mut demo_timeline(), FRAMES, frame_size())
        .expect("second fingerprint should render");

    assert_eq!(first, second);
    assert_eq!(first.track_count, 4);
    assert_eq!(first.clip_count, 5);
    assert_eq!(first.render_hash.len(), 64);
    assert!(first.layer_count > 0);
}

#[test]
fn editing_track_opacity_changes_both_hashes() {
    let baseline = render_fingerprint(&mut demo_timeline(), FRAMES, frame_size())
        .expect("baseline fingerprint should render");

    let mut edited = demo_timeline();
    edited
        .track_mut(0)
        .expect("overlay track should be editable")
        .set_opacity(0.5);
    let report = render_fingerprint(&mut edited, FRAMES, frame_size())
        .expect("edited fingerprint should render");

    assert_ne!(report.render_hash, baseline.render_hash);
    assert_ne!(report.structure_hash, baseline.structure_hash);
    assert_eq!(report.clip_count, baseline.clip_count);
}

#[test]
fn overlay_frames_draw_through_translucent_layers() {
    let mut timeline = demo_timeline();

    let backdrop_only =
        record_frame(&mut timeline, 10, frame_size()).expect("frame 10 should render");
    let with_overlay =
        record_frame(&mut timeline, 60, frame_size()).expect("frame 60 should render");

    let fills = |commands: &[SurfaceCommand]| {
        commands
            .iter()
            .filter(|command| matches!(command, SurfaceCommand::Fill { .. }))
            .count()
    };
    assert_eq!(fills(&backdrop_only), 1);
    assert_eq!(fills(&with_overlay), 2);
    assert!(with_overlay.contains(&SurfaceCommand::SaveLayer {
        depth: 3,
        alpha: 128
    }));
    assert!(with_overlay.contains(&SurfaceCommand::Effect {
        name: "color_grade".to_owned(),
        frame: 60,
        pre: false,
    }));
}

#[test]
fn reports_roundtrip_through_disk() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("fingerprints").join("report.json");
    let report = render_fingerprint(&mut demo_timeline(), FrameSpan::new(100, 40), frame_size())
        .expect("fingerprint should render");

    write_fingerprint_report(&path, &report).expect("writing report should work");
    let loaded = read_fingerprint_report(&path).expect("reading report should work");
    assert_eq!(loaded, report);
}
