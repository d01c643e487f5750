use cutline_core::{ClipId, ClipRangeCache, FrameSpan};
use proptest::prelude::*;

fn spans() -> impl Strategy<Value = Vec<FrameSpan>> {
    prop::collection::vec(
        (-600i64..600, 1i64..400).prop_map(|(begin, duration)| FrameSpan::new(begin, duration)),
        1..24,
    )
}

fn build(shift: u32, spans: &[FrameSpan]) -> (ClipRangeCache, Vec<(ClipId, FrameSpan)>) {
    let mut cache = ClipRangeCache::with_chunk_shift(shift);
    let mut registered = Vec::new();
    for span in spans {
        let id = ClipId::new();
        cache.add(id, *span).expect("fresh clip should register");
        registered.push((id, *span));
    }
    (cache, registered)
}

/// Latest registration wins, exactly like a linear scan from the top.
fn brute_force_primary(registered: &[(ClipId, FrameSpan)], frame: i64) -> Option<ClipId> {
    registered
        .iter()
        .rev()
        .find(|(_, span)| span.intersects_frame(frame))
        .map(|(id, _)| *id)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn primary_lookup_matches_a_linear_scan(
        clip_spans in spans(),
        shift in 1u32..10,
        frames in prop::collection::vec(-700i64..1100, 1..32),
    ) {
        let (cache, registered) = build(shift, &clip_spans);
        for frame in frames {
            prop_assert_eq!(cache.get_primary_at(frame), brute_force_primary(&registered, frame));

            let expected: Vec<_> = registered
                .iter()
                .rev()
                .filter(|(_, span)| span.intersects_frame(frame))
                .map(|(id, _)| *id)
                .collect();
            prop_assert_eq!(cache.clips_at_frame(frame), expected);
        }
    }

    #[test]
    fn region_queries_match_a_linear_scan(
        clip_spans in spans(),
        shift in 1u32..10,
        probe_begin in -700i64..1100,
        probe_duration in 1i64..300,
    ) {
        let (cache, registered) = build(shift, &clip_spans);
        let probe = FrameSpan::new(probe_begin, probe_duration);

        let mut expected: Vec<_> = registered
            .iter()
            .filter(|(_, span)| span.intersects(&probe))
            .map(|(id, _)| *id)
            .collect();
        let mut found = cache.clips_in_span(probe);
        prop_assert_eq!(cache.is_region_empty(probe), expected.is_empty());

        expected.sort_unstable();
        found.sort_unstable();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn removal_restores_scan_equivalence_and_bounds(
        clip_spans in spans(),
        shift in 1u32..10,
        keep_mask in prop::collection::vec(any::<bool>(), 24),
    ) {
        let (mut cache, registered) = build(shift, &clip_spans);
        let mut kept = Vec::new();
        for ((id, span), keep) in registered.iter().zip(keep_mask.iter()) {
            if *keep {
                kept.push((*id, *span));
            } else {
                cache.remove(*span, *id).expect("registered clip should be removable");
            }
        }

        prop_assert_eq!(cache.len(), kept.len());
        if let Some(bounds) = FrameSpan::union_all(kept.iter().map(|(_, span)| *span)) {
            prop_assert!(cache.smallest_active_frame() <= bounds.begin);
            prop_assert!(cache.largest_active_frame() >= bounds.end());
        }
        for frame in (-700i64..1100).step_by(37) {
            prop_assert_eq!(cache.get_primary_at(frame), brute_force_primary(&kept, frame));
        }
    }

    #[test]
    fn moved_clips_are_found_only_at_their_new_span(
        clip_spans in spans(),
        shift in 1u32..10,
        target in 0usize..24,
        new_begin in -600i64..600,
        new_duration in 1i64..400,
    ) {
        let (mut cache, registered) = build(shift, &clip_spans);
        let (id, old_span) = registered[target % registered.len()];
        let new_span = FrameSpan::new(new_begin, new_duration);
        cache.on_span_changed(id, old_span, new_span).expect("registered clip should move");

        for frame in (-700i64..1100).step_by(13) {
            let present = cache.clips_at_frame(frame).contains(&id);
            prop_assert_eq!(present, new_span.intersects_frame(frame), "frame {}", frame);
        }
        prop_assert_eq!(cache.len(), registered.len());
    }

    #[test]
    fn span_intersection_is_symmetric(
        a_begin in -500i64..500,
        a_duration in 1i64..300,
        b_begin in -500i64..500,
        b_duration in 1i64..300,
    ) {
        let a = FrameSpan::new(a_begin, a_duration);
        let b = FrameSpan::new(b_begin, b_duration);
        prop_assert_eq!(a.intersects(&b), b.intersects(&a));
        prop_assert_eq!(a.intersects(&b), a.clamp(b).duration > 0);
    }
}

#[test]
fn removing_with_a_stale_span_is_reported() {
    let mut cache = ClipRangeCache::with_chunk_shift(4);
    let id = ClipId::new();
    cache
        .add(id, FrameSpan::new(0, 10))
        .expect("clip should register");

    assert!(cache.remove(FrameSpan::new(200, 10), id).is_err());
    assert_eq!(cache.get_primary_at(5), Some(id));
}
