use ndarray::{s, Array2, ArrayView2};

use crate::pipeline::config::SearchMethod;

use super::correlation::multilevel_correlation;
use super::phase_correlation::translation;
use super::search::{search_local_match, search_local_match_gradient, LocalShift, SearchFailure, Window};

/// Reference data of one registration box.
#[derive(Clone, Copy, Debug)]
pub struct SearchReference<'a> {
    /// Reference box at full resolution.
    pub reference: ArrayView2<'a, f32>,
    /// Reference box on the stride-2 grid, used by the coarse correlation
    /// phase. Derived from `reference` when absent.
    pub first_phase: Option<ArrayView2<'a, f32>>,
}

/// Parameters shared by all shift searches of one job stage.
#[derive(Clone, Copy, Debug)]
pub struct SearchParams<'a> {
    pub method: SearchMethod,
    pub search_width: usize,
    pub sampling_stride: usize,
    pub sub_pixel: bool,
    /// Extra blur of the coarse correlation window.
    pub blur_width: usize,
    pub weight_matrix: Option<&'a Array2<f32>>,
}

/// Shift of `frame` inside `window` relative to the reference box, using the
/// configured method.
pub fn compute_shift_configured(
    reference: &SearchReference,
    frame: ArrayView2<f32>,
    window: Window,
    params: &SearchParams,
) -> std::result::Result<LocalShift, SearchFailure> {
    match params.method {
        SearchMethod::Translation => {
            let view = window.view(frame).ok_or(SearchFailure::OutsideFrame)?;
            let [dy, dx] =
                translation(reference.reference, view).map_err(|_| SearchFailure::OutsideFrame)?;
            Ok(LocalShift::integer(dy as isize, dx as isize, Vec::new()))
        }
        SearchMethod::MultiLevelCorrelation => {
            let derived: Array2<f32>;
            let first_phase = match reference.first_phase {
                Some(view) => view,
                None => {
                    derived = reference.reference.slice(s![..;2, ..;2]).to_owned();
                    derived.view()
                }
            };
            let result = multilevel_correlation(
                first_phase,
                frame,
                params.blur_width,
                reference.reference,
                window,
                params.search_width,
                params.weight_matrix,
                params.sub_pixel,
            )?;
            if !result.success() {
                return Err(SearchFailure::BoundaryOptimum);
            }
            let (dy, dx) = result.total();
            Ok(LocalShift {
                dy,
                dx,
                dev_r: Vec::new(),
            })
        }
        SearchMethod::RadialSearch => search_local_match(
            reference.reference,
            frame,
            window,
            params.search_width,
            params.sampling_stride,
            params.sub_pixel,
        ),
        SearchMethod::SteepestDescent => search_local_match_gradient(
            reference.reference,
            frame,
            window,
            params.search_width,
            params.sampling_stride,
        ),
    }
}
