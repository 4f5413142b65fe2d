mod common;

use std::collections::HashSet;

use apstack_core::align::correlation::{match_template_ccorr_normed, multilevel_correlation};
use apstack_core::align::search::{
    circle_around, deviation, search_local_match, search_local_match_gradient, sub_pixel_solve, SearchFailure,
    Window,
};
use apstack_core::align::{compute_shift_configured, SearchParams, SearchReference};
use apstack_core::error::StackError;
use apstack_core::pipeline::config::SearchMethod;
use ndarray::{s, Array2};

use common::wave_field;

/// Reference box at `window` in the unshifted field, and a frame whose
/// content for reference position `p` lies at `p - shift`.
fn reference_and_frame(shift: (i32, i32), window: Window) -> (Array2<f32>, Array2<f32>) {
    let field = wave_field(128, 128, 0, 0);
    let reference = field
        .slice(s![window.y_low..window.y_high, window.x_low..window.x_high])
        .to_owned();
    let frame = wave_field(128, 128, -shift.0, -shift.1);
    (reference, frame)
}

#[test]
fn test_circle_around_ring_sizes() {
    assert_eq!(circle_around(3, 4, 0), vec![(3, 4)]);
    for r in 1..6 {
        let ring = circle_around(0, 0, r);
        assert_eq!(ring.len(), 8 * r as usize, "ring {} should hold 8r points", r);
        let unique: HashSet<_> = ring.iter().copied().collect();
        assert_eq!(unique.len(), ring.len(), "ring {} has duplicates", r);
        for (y, x) in ring {
            assert_eq!(y.abs().max(x.abs()), r, "({}, {}) not on ring {}", y, x, r);
        }
    }
}

#[test]
fn test_circle_around_is_centered() {
    let ring = circle_around(10, -5, 2);
    for (y, x) in ring {
        assert_eq!((y - 10).abs().max((x + 5).abs()), 2);
    }
}

#[test]
fn test_sub_pixel_solve_quadratic_bowl() {
    // f(y, x) = (y - 0.3)^2 + 2 (x + 0.2)^2, sampled at y, x in {-1, 0, 1}
    let mut values = [[0.0f64; 3]; 3];
    for (row, line) in values.iter_mut().enumerate() {
        for (col, v) in line.iter_mut().enumerate() {
            let y = row as f64 - 1.0;
            let x = col as f64 - 1.0;
            *v = (y - 0.3).powi(2) + 2.0 * (x + 0.2).powi(2);
        }
    }
    let (y, x) = sub_pixel_solve(&values).unwrap();
    assert!((y - 0.3).abs() < 1e-9, "y={} should be 0.3", y);
    assert!((x + 0.2).abs() < 1e-9, "x={} should be -0.2", x);
}

#[test]
fn test_sub_pixel_solve_flat_input_fails() {
    let values = [[5.0f64; 3]; 3];
    assert!(matches!(sub_pixel_solve(&values), Err(StackError::DivideByZero)));
}

#[test]
fn test_deviation_zero_at_true_shift() {
    let window = Window::new(48, 80, 48, 80);
    let (reference, frame) = reference_and_frame((2, -3), window);
    let at_truth = deviation(reference.view(), frame.view(), window, 2, -3, 2);
    let elsewhere = deviation(reference.view(), frame.view(), window, 0, 0, 2);
    assert_eq!(at_truth, 0.0);
    assert!(elsewhere > 0.0);
}

#[test]
fn test_deviation_outside_frame_is_infinite() {
    let window = Window::new(0, 32, 0, 32);
    let (reference, frame) = reference_and_frame((0, 0), window);
    let value = deviation(reference.view(), frame.view(), window, 1, 0, 1);
    assert!(value.is_infinite());
}

#[test]
fn test_radial_and_gradient_search_agree_with_truth() {
    let window = Window::new(48, 80, 48, 80);
    for &shift in &[(2, -3), (-4, 1), (0, 0), (3, 3)] {
        let (reference, frame) = reference_and_frame(shift, window);

        let radial = search_local_match(reference.view(), frame.view(), window, 8, 1, false).unwrap();
        let descent = search_local_match_gradient(reference.view(), frame.view(), window, 8, 1).unwrap();

        assert_eq!(
            (radial.dy, radial.dx),
            (shift.0 as f32, shift.1 as f32),
            "radial search for shift {:?}",
            shift
        );
        assert_eq!(
            (descent.dy, descent.dx),
            (radial.dy, radial.dx),
            "steepest descent for shift {:?}",
            shift
        );
        assert!(!radial.dev_r.is_empty());
    }
}

#[test]
fn test_radial_search_outside_frame() {
    let window = Window::new(-4, 28, 10, 42);
    let reference = Array2::<f32>::zeros((32, 32));
    let frame = Array2::<f32>::zeros((64, 64));
    let result = search_local_match(reference.view(), frame.view(), window, 4, 1, false);
    assert_eq!(result, Err(SearchFailure::OutsideFrame));
}

#[test]
fn test_ccorr_normed_peaks_at_template_position() {
    let field = wave_field(40, 40, 0, 0);
    let template = field.slice(s![12..22, 7..17]);
    let result = match_template_ccorr_normed(field.view(), template);
    assert_eq!(result.dim(), (31, 31));
    assert!((result[[12, 7]] - 1.0).abs() < 1e-5, "peak value {}", result[[12, 7]]);
    for &v in result.iter() {
        assert!(v <= result[[12, 7]] + 1e-6);
    }
}

#[test]
fn test_multilevel_correlation_recovers_shift() {
    let window = Window::new(44, 84, 44, 84);
    for &shift in &[(5, -7), (-2, 3), (0, 0)] {
        let (reference, frame) = reference_and_frame(shift, window);
        let first_phase = reference.slice(s![..;2, ..;2]).to_owned();
        let result = multilevel_correlation(
            first_phase.view(),
            frame.view(),
            0,
            reference.view(),
            window,
            20,
            None,
            false,
        )
        .unwrap();
        assert!(result.success(), "shift {:?} should be found", shift);
        assert_eq!(result.total(), (shift.0 as f32, shift.1 as f32));
    }
}

#[test]
fn test_dispatcher_translation_and_radial() {
    let window = Window::new(32, 96, 32, 96);
    let (reference, frame) = reference_and_frame((3, -2), window);
    let search_ref = SearchReference {
        reference: reference.view(),
        first_phase: None,
    };

    let mut params = SearchParams {
        method: SearchMethod::RadialSearch,
        search_width: 6,
        sampling_stride: 1,
        sub_pixel: false,
        blur_width: 0,
        weight_matrix: None,
    };
    let radial = compute_shift_configured(&search_ref, frame.view(), window, &params).unwrap();
    assert_eq!((radial.dy, radial.dx), (3.0, -2.0));

    params.method = SearchMethod::MultiLevelCorrelation;
    params.search_width = 14;
    let multilevel = compute_shift_configured(&search_ref, frame.view(), window, &params).unwrap();
    assert_eq!((multilevel.dy, multilevel.dx), (3.0, -2.0));
}

#[test]
fn test_dispatcher_reports_outside_frame() {
    let window = Window::new(100, 140, 10, 50);
    let reference = Array2::<f32>::ones((40, 40));
    let frame = Array2::<f32>::ones((128, 128));
    let search_ref = SearchReference {
        reference: reference.view(),
        first_phase: None,
    };
    for method in [
        SearchMethod::Translation,
        SearchMethod::MultiLevelCorrelation,
        SearchMethod::RadialSearch,
        SearchMethod::SteepestDescent,
    ] {
        let params = SearchParams {
            method,
            search_width: 10,
            sampling_stride: 1,
            sub_pixel: false,
            blur_width: 0,
            weight_matrix: None,
        };
        let result = compute_shift_configured(&search_ref, frame.view(), window, &params);
        assert_eq!(result, Err(SearchFailure::OutsideFrame), "method {}", method);
    }
}
