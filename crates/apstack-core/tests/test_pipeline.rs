mod common;

use apstack_core::error::StackError;
use apstack_core::frame::Rect;
use apstack_core::pipeline::config::{AlignMode, DrizzleFactor, SearchMethod, StackConfig};
use apstack_core::pipeline::{run_stacking, CancelFlag, NoOpReporter, StackingOutput};
use apstack_core::source::MemoryFrameSource;

use common::{bright_square, mono_source, pseudo_random_shifts, test_config, wave_field, wave_value};

const SIZE: usize = 160;

fn pipeline_config() -> StackConfig {
    let mut config = test_config();
    config.align.method = SearchMethod::RadialSearch;
    config.align.search_width = 20;
    config
}

fn wave_sequence(count: usize) -> (MemoryFrameSource, Vec<(i32, i32)>) {
    let shifts = pseudo_random_shifts(count, 4);
    let frames = shifts
        .iter()
        .map(|&(dy, dx)| wave_field(SIZE, SIZE, dy, dx))
        .collect();
    (mono_source(frames), shifts)
}

/// Every output pixel must show the pattern as seen in the reference frame.
fn assert_reproduces_reference(output: &StackingOutput, shifts: &[(i32, i32)]) {
    let (ref_dy, ref_dx) = shifts[output.frame_ranking.frame_ranks_max_index];
    let rect = output.intersection;
    let (h, w) = output.intersection_shape();
    assert_eq!(output.stacked_image.dim(), (h, w, 1));
    for y in 0..h {
        for x in 0..w {
            let expected = wave_value(
                (y + rect.y_low) as f64 - ref_dy as f64,
                (x + rect.x_low) as f64 - ref_dx as f64,
            );
            let got = output.stacked_image[[y, x, 0]] as f32;
            assert!(
                (got - expected).abs() <= 1.0,
                "pixel ({}, {}) = {}, expected {}",
                y,
                x,
                got,
                expected
            );
        }
    }
}

#[test]
fn test_run_stacking_end_to_end() {
    let (source, shifts) = wave_sequence(12);
    let output = run_stacking(&source, &pipeline_config(), &NoOpReporter).unwrap();

    assert_eq!(output.frame_shifts.len(), 12);
    assert_eq!(output.frame_shifts[output.frame_ranking.frame_ranks_max_index], [0, 0]);
    let range_y = shifts.iter().map(|s| s.0).max().unwrap() - shifts.iter().map(|s| s.0).min().unwrap();
    let range_x = shifts.iter().map(|s| s.1).max().unwrap() - shifts.iter().map(|s| s.1).min().unwrap();
    assert_eq!(
        output.intersection_shape(),
        (SIZE - range_y as usize, SIZE - range_x as usize)
    );

    let report = &output.report;
    assert_eq!(report.alignment_point_count, 8);
    assert_eq!(output.alignment_points.len(), 8);
    assert_eq!(report.stack_size, 2);
    assert_eq!(report.stacking_holes, 0);
    assert_eq!(report.drizzle_holes, 0);
    assert_eq!(report.alignment_rects_tried, 1);
    assert!(report.alignment_rect.is_some());
    assert_eq!(report.average_frame_number, 1);
    assert_eq!(report.failure_percent, 0.0);
    assert_eq!(report.shift_distribution.iter().sum::<usize>(), 8 * 2);
    assert!(report.shift_table.contains("Shift (pixels):"));

    assert_reproduces_reference(&output, &shifts);
}

#[test]
fn test_run_stacking_with_roi() {
    let (source, shifts) = wave_sequence(8);
    let mut config = pipeline_config();
    config.align.roi = Some(Rect::new(10, 90, 20, 120));
    let output = run_stacking(&source, &config, &NoOpReporter).unwrap();

    assert_eq!(output.intersection_shape(), (80, 100));
    assert_reproduces_reference(&output, &shifts);
}

#[test]
fn test_run_stacking_drizzled() {
    let (source, _) = wave_sequence(8);
    let mut config = pipeline_config();
    config.stack.drizzle = DrizzleFactor::Two;
    let output = run_stacking(&source, &config, &NoOpReporter).unwrap();

    let (h, w) = output.intersection_shape();
    assert_eq!(output.stacked_image.dim(), (2 * h, 2 * w, 1));
    assert!(output.report.drizzle_holes > 0);
}

#[test]
fn test_run_stacking_one_and_a_half_drizzle() {
    let (source, _) = wave_sequence(6);
    let mut config = pipeline_config();
    config.stack.drizzle = DrizzleFactor::OnePointFive;
    let output = run_stacking(&source, &config, &NoOpReporter).unwrap();

    let (h, w) = output.intersection_shape();
    assert_eq!(output.stacked_image.dim(), (3 * h / 2, 3 * w / 2, 1));
}

#[test]
fn test_run_stacking_planet_mode() {
    let shifts = pseudo_random_shifts(6, 4);
    let frames = shifts
        .iter()
        .map(|&(dy, dx)| {
            bright_square(
                SIZE,
                SIZE,
                (50 + dy) as usize,
                (50 + dx) as usize,
                60,
                4000.0,
                40000.0,
            )
        })
        .collect();
    let source = mono_source(frames);
    let mut config = test_config();
    config.align.mode = AlignMode::Planet;
    let output = run_stacking(&source, &config, &NoOpReporter).unwrap();

    assert!(output.report.alignment_rect.is_none());
    assert_eq!(output.report.alignment_rects_tried, 0);
    let (h, w) = output.intersection_shape();
    assert_eq!(output.stacked_image.dim(), (h, w, 1));
}

#[test]
fn test_run_stacking_rejects_invalid_config() {
    let (source, _) = wave_sequence(3);
    let mut config = pipeline_config();
    config.alignment_points.half_box_width = 5;
    assert!(matches!(
        run_stacking(&source, &config, &NoOpReporter),
        Err(StackError::Argument(_))
    ));
}

#[test]
fn test_run_stacking_respects_memory_budget() {
    let (source, _) = wave_sequence(4);
    let mut config = pipeline_config();
    config.stack.max_memory_gb = Some(1e-6);
    assert!(matches!(
        run_stacking(&source, &config, &NoOpReporter),
        Err(StackError::MemoryBudgetExceeded { required, budget }) if required > budget
    ));

    config.stack.max_memory_gb = Some(1.0);
    let output = run_stacking(&source, &config, &NoOpReporter).unwrap();
    assert_eq!(output.report.stacking_holes, 0);
}

#[test]
fn test_run_stacking_can_be_cancelled() {
    let (source, _) = wave_sequence(4);
    let flag = CancelFlag::new();
    flag.cancel();
    assert!(matches!(
        run_stacking(&source, &pipeline_config(), &flag),
        Err(StackError::Cancelled)
    ));
}
