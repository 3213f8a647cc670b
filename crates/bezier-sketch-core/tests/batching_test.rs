//! Integration tests for the batching discipline and the render boundary.

use bezier_sketch_core::batch::{normalize_batch, normalize_sketch};
use bezier_sketch_core::types::{CurveDescriptor, Sketch, Stroke};
use bezier_sketch_core::render::{decode_strokes, RenderableCurve};

fn line_stroke(x0: f32, y0: f32, n: usize) -> Stroke {
    let rows: Vec<[f32; 3]> = (0..n)
        .map(|i| {
            let last = if i + 1 == n { 1.0 } else { 0.0 };
            [x0 + i as f32, y0 + 2.0 * i as f32, last]
        })
        .collect();
    Stroke::from_rows(&rows)
}

#[test]
fn offset_round_trip_for_straight_line() {
    // A straight-line stroke whose control points are known analytically:
    // with equal deltas along the line direction, the decoded control
    // points land on the original path's endpoints.
    let stroke = line_stroke(10.0, 5.0, 4);
    let anchor = stroke.start_anchor().unwrap();
    assert_eq!(anchor, [10.0, 5.0]);

    // Degree-3 descriptor covering the same span: endpoint offset is (3, 6).
    let descriptor =
        CurveDescriptor::new(vec![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]], None, 3).unwrap();
    let points = descriptor.control_points(anchor);

    assert_eq!(points.first().copied(), Some([10.0, 5.0]));
    let end = stroke.samples().last().unwrap().position;
    assert_eq!(points.last().copied(), Some(end));
}

#[test]
fn stop_bits_transition_exactly_at_count() {
    for count in 1..5 {
        let sketch = Sketch::new(vec![line_stroke(0.0, 0.0, 3); count]);
        let bits = sketch.stop_bits(6);
        for (i, &bit) in bits.iter().enumerate() {
            let expected = if i + 1 >= count { 1.0 } else { 0.0 };
            assert_eq!(bit, expected, "count={count} index={i}");
        }
    }
}

#[test]
fn batch_normalization_matches_singleton() {
    // Padding must not leak into real positions: a sketch normalized inside
    // a batch of uneven sketches is identical to the singleton result.
    let target = Sketch::new(vec![line_stroke(1.0, 1.0, 5), line_stroke(-3.0, 2.0, 2)]);
    let other = Sketch::new(vec![
        line_stroke(0.0, 0.0, 9),
        line_stroke(4.0, 4.0, 7),
        line_stroke(8.0, 8.0, 3),
    ]);

    let solo = normalize_sketch(&target).unwrap();
    let batch = normalize_batch(&[other, target.clone()]).unwrap();
    let in_batch = &batch[1];

    assert_eq!(solo.start_anchors, in_batch.start_anchors);
    assert_eq!(solo.lengths, in_batch.lengths);
    assert_eq!(solo.offsets, in_batch.offsets);
}

#[test]
fn decoded_sequence_respects_stop() {
    let descriptors: Vec<CurveDescriptor> = (0..4)
        .map(|_| CurveDescriptor::new(vec![[1.0, 0.0], [0.0, 1.0]], None, 2).unwrap())
        .collect();
    let anchors = vec![[0.0, 0.0], [2.0, 0.0], [4.0, 0.0], [6.0, 0.0]];
    let stop_bits = vec![0.0, 1.0, 1.0, 1.0];

    let curves = decode_strokes(&descriptors, &anchors, &stop_bits);
    assert_eq!(curves.len(), 2);
    assert_eq!(
        curves[1],
        RenderableCurve::from_descriptor(&descriptors[1], [2.0, 0.0])
    );
}
