mod common;

use apstack_core::error::StackError;
use apstack_core::pipeline::config::{AlignmentPointsConfig, RankMethod, SearchMethod};
use apstack_core::pipeline::NoOpReporter;
use apstack_core::stack::ap_grid::{ap_locations, compute_shift_alignment_point};
use apstack_core::stack::{AlignmentPoints, PatchExtension};
use ndarray::Array2;

use common::{mono_source, texture, wave_field};

const SIZE: usize = 154;

fn default_grid(mean: &Array2<f32>) -> AlignmentPoints {
    let mut points = AlignmentPoints::new(mean, AlignmentPointsConfig::default(), 0);
    points.create_ap_grid().unwrap();
    points
}

/// Frames of the same texture with decreasing contrast: frame 0 is sharpest.
fn contrast_series() -> Vec<Array2<f32>> {
    let base = texture(SIZE, SIZE);
    [1.0f32, 0.8, 0.6, 0.4, 0.2]
        .iter()
        .map(|&c| base.mapv(|v| 10000.0 + v * 0.5 * c))
        .collect()
}

#[test]
fn test_ap_locations_staggered_rows() {
    assert_eq!(ap_locations(SIZE, 38, 54, true).unwrap(), vec![38, 77, 116]);
    assert_eq!(ap_locations(SIZE, 38, 54, false).unwrap(), vec![57, 96]);
}

#[test]
fn test_ap_locations_rejects_small_extent() {
    assert!(matches!(ap_locations(76, 38, 54, true), Err(StackError::Argument(_))));
    assert!(matches!(ap_locations(40, 38, 54, false), Err(StackError::Argument(_))));
}

#[test]
fn test_default_geometry() {
    let points = AlignmentPoints::new(&wave_field(SIZE, SIZE, 0, 0), AlignmentPointsConfig::default(), 0);
    assert_eq!(points.half_patch_width(), 36);
    assert_eq!(points.min_boundary_distance(), 38);
    assert_eq!(points.shape(), (SIZE, SIZE));
}

#[test]
fn test_grid_points_fit_into_frame() {
    let points = default_grid(&wave_field(SIZE, SIZE, 0, 0));
    assert_eq!(points.dropped_dim, 0);
    assert_eq!(points.len() + points.dropped_structure, 8);
    assert!(!points.is_empty());

    let max_structure = points.points.iter().map(|p| p.structure).fold(0.0f64, f64::max);
    assert!((max_structure - 1.0).abs() < 1e-12, "structure normalized to the best point");

    for p in &points.points {
        let b = p.box_bounds;
        assert_eq!((b.height(), b.width()), (48, 48));
        assert!(b.y_high <= SIZE && b.x_high <= SIZE);
        let patch = p.patch_bounds;
        assert!(patch.y_low <= b.y_low && patch.y_high >= b.y_high, "patch must cover the box");
        assert!(patch.x_low <= b.x_low && patch.x_high >= b.x_high, "patch must cover the box");
        assert!(patch.y_high <= SIZE && patch.x_high <= SIZE);
        assert_eq!(p.reference_box.dim(), (48, 48));
        assert!(p.structure >= AlignmentPointsConfig::default().structure_threshold);
    }
}

#[test]
fn test_border_points_extend_patches() {
    let points = default_grid(&texture(SIZE, SIZE).mapv(|v| v + 5000.0));
    assert_eq!(points.len(), 8);
    let top_left = &points.points[points.find_neighbor(38, 38).unwrap().0];
    assert_eq!(top_left.extended_sides((SIZE, SIZE)), (true, false, true, false));
    let bottom_right = &points.points[points.find_neighbor(116, 116).unwrap().0];
    assert_eq!(bottom_right.extended_sides((SIZE, SIZE)), (false, true, false, true));
    let center = &points.points[points.find_neighbor(77, 57).unwrap().0];
    assert_eq!((center.y, center.x), (77, 57));
    assert_eq!(center.patch_bounds.y_low, 77 - 36);
    assert_eq!(center.patch_bounds.x_low, 0, "first point of an odd row reaches the left border");
}

#[test]
fn test_dark_frame_drops_all_points() {
    let points = default_grid(&Array2::zeros((SIZE, SIZE)));
    assert!(points.is_empty());
    assert_eq!(points.dropped_dim, 8);
    assert_eq!(points.dropped_structure, 0);
}

#[test]
fn test_new_alignment_point_respects_boundary_distance() {
    let points = default_grid(&wave_field(SIZE, SIZE, 0, 0));
    assert!(points.new_alignment_point(37, 77, PatchExtension::default()).is_none());
    assert!(points.new_alignment_point(77, SIZE - 37, PatchExtension::default()).is_none());
    let p = points.new_alignment_point(38, 77, PatchExtension::default()).unwrap();
    assert_eq!(p.patch_bounds.y_low, 2);
    assert_eq!(p.box_bounds.y_low, 14);
}

#[test]
fn test_find_remove_replace() {
    let mut points = default_grid(&texture(SIZE, SIZE).mapv(|v| v + 5000.0));
    assert_eq!(points.len(), 8);

    let middle_row = points.find_alignment_points(77, 77, 0, SIZE);
    assert_eq!(middle_row.len(), 2);
    let (nearest, distance) = points.find_neighbor(80, 60).unwrap();
    assert!(middle_row.contains(&nearest));
    assert!((distance - 18.0f64.sqrt()).abs() < 1e-9);

    let replacement = points
        .new_alignment_point(70, 70, PatchExtension::default())
        .unwrap();
    assert!(points.replace_alignment_point(nearest, replacement.clone()));
    assert_eq!((points.points[nearest].y, points.points[nearest].x), (70, 70));
    assert!(!points.replace_alignment_point(100, replacement));

    points.remove_alignment_points(&middle_row);
    assert_eq!(points.len(), 6);
    assert!(points.find_alignment_points(77, 77, 0, SIZE).is_empty());
    points.remove_alignment_points(&[42]);
    assert_eq!(points.len(), 6);

    let extra = points.new_alignment_point(77, 77, PatchExtension::default()).unwrap();
    points.add_alignment_point(extra);
    assert_eq!(points.len(), 7);
    assert_eq!(points.find_neighbor(77, 77).unwrap().1, 0.0);
}

#[test]
fn test_compute_stack_size() {
    let mut config = AlignmentPointsConfig::default();
    let mean = wave_field(SIZE, SIZE, 0, 0);
    assert_eq!(AlignmentPoints::new(&mean, config.clone(), 0).compute_stack_size(12), 2);
    assert_eq!(AlignmentPoints::new(&mean, config.clone(), 0).compute_stack_size(3), 1);

    config.frame_number = Some(50);
    assert_eq!(AlignmentPoints::new(&mean, config.clone(), 0).compute_stack_size(12), 12);
    config.frame_number = Some(0);
    assert_eq!(AlignmentPoints::new(&mean, config, 0).compute_stack_size(12), 1);
}

#[test]
fn test_frame_qualities_select_sharpest_frames() {
    let frames = contrast_series();
    let mean = frames[0].clone();
    let source = mono_source(frames);
    let config = AlignmentPointsConfig {
        frame_number: Some(2),
        ..AlignmentPointsConfig::default()
    };
    let mut points = AlignmentPoints::new(&mean, config, 0);
    points.create_ap_grid().unwrap();
    let offsets = vec![[0isize, 0]; 5];
    points
        .compute_frame_qualities(&source, &offsets, RankMethod::Laplace, &NoOpReporter)
        .unwrap();

    assert_eq!(points.stack_size(), 2);
    let used = points.used_alignment_points();
    assert_eq!(used.len(), 5);
    for (ap_index, p) in points.points.iter().enumerate() {
        assert_eq!(p.frame_qualities.len(), 5);
        assert_eq!(p.best_frame_indices, vec![0, 1], "point ({}, {})", p.y, p.x);
        for frame in 0..5 {
            assert_eq!(
                used[frame].contains(&ap_index),
                p.best_frame_indices.contains(&frame),
                "reverse index mismatch for frame {} at point {}",
                frame,
                ap_index
            );
        }
    }
    assert!(used[4].is_empty());
}

#[test]
fn test_frame_qualities_without_stored_laplacian() {
    let frames = contrast_series();
    let mean = frames[0].clone();
    let source = mono_source(frames);
    let config = AlignmentPointsConfig {
        frame_number: Some(3),
        rank_method: RankMethod::Sobel,
        ..AlignmentPointsConfig::default()
    };
    let mut points = AlignmentPoints::new(&mean, config, 0);
    points.create_ap_grid().unwrap();
    points
        .compute_frame_qualities(&source, &[[0, 0]; 5], RankMethod::Laplace, &NoOpReporter)
        .unwrap();
    for p in &points.points {
        assert_eq!(p.best_frame_indices, vec![0, 1, 2]);
    }
}

#[test]
fn test_frame_qualities_check_offsets() {
    let frames = contrast_series();
    let mean = frames[0].clone();
    let source = mono_source(frames);
    let mut points = default_grid(&mean);
    let result = points.compute_frame_qualities(&source, &[[0, 0]; 3], RankMethod::Laplace, &NoOpReporter);
    assert!(matches!(result, Err(StackError::Argument(_))));
}

#[test]
fn test_local_shift_at_alignment_point() {
    let mean = wave_field(SIZE, SIZE, 0, 0);
    let config = AlignmentPointsConfig {
        method: SearchMethod::RadialSearch,
        sampling_stride: 1,
        ..AlignmentPointsConfig::default()
    };
    let points = {
        let mut points = AlignmentPoints::new(&mean, config, 0);
        points.create_ap_grid().unwrap();
        points
    };
    let point = points.new_alignment_point(77, 77, PatchExtension::default()).unwrap();
    let params = points.search_params(1);

    // Mean-frame origin at (3, 2) inside the frame, local warp (2, -3).
    let frame = wave_field(SIZE, SIZE, 1, 5);
    let shift = compute_shift_alignment_point(frame.view(), &point, [3, 2], &params, true).unwrap();
    assert_eq!((shift.dy, shift.dx), (2.0, -3.0));

    let still = compute_shift_alignment_point(frame.view(), &point, [3, 2], &params, false).unwrap();
    assert_eq!((still.dy, still.dx), (0.0, 0.0));
}
