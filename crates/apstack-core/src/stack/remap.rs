use ndarray::{s, Array3};

use crate::frame::Rect;

/// Add the frame region `patch + (shift_y, shift_x)` to `buffer`, which covers
/// `patch`. Rows and columns falling outside the frame are skipped.
pub fn remap_rigid(frame: &Array3<f32>, buffer: &mut Array3<f32>, shift_y: isize, shift_x: isize, patch: Rect) {
    let (h, w, _) = frame.dim();
    let Some((src_y, dst_y)) = clip_axis(patch.y_low, patch.y_high, shift_y, h) else {
        return;
    };
    let Some((src_x, dst_x)) = clip_axis(patch.x_low, patch.x_high, shift_x, w) else {
        return;
    };

    let mut target = buffer.slice_mut(s![dst_y.0..dst_y.1, dst_x.0..dst_x.1, ..]);
    target += &frame.slice(s![src_y.0..src_y.1, src_x.0..src_x.1, ..]);
}

/// Source and destination ranges of one axis after clipping the shifted
/// patch `[low + shift, high + shift)` to `[0, dim)`.
type AxisRanges = ((usize, usize), (usize, usize));

fn clip_axis(low: usize, high: usize, shift: isize, dim: usize) -> Option<AxisRanges> {
    let src_low = low as isize + shift;
    let src_high = high as isize + shift;
    let from = src_low.max(0);
    let to = src_high.min(dim as isize);
    if to <= from {
        return None;
    }
    let dst_low = (from - src_low) as usize;
    let dst_high = dst_low + (to - from) as usize;
    Some(((from as usize, to as usize), (dst_low, dst_high)))
}
