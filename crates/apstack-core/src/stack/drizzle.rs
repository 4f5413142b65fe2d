use ndarray::{s, Array2, Array3, Axis};

use crate::align::search::circle_around;
use crate::frame::Rect;

/// Placement of one axis of a drizzled copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DrizzleAxis {
    /// First frame pixel read.
    from: usize,
    /// First buffer position written.
    target: usize,
    /// Number of frame pixels copied.
    count: usize,
}

/// Whole-pixel part of a shift on the fine grid and the sub-pixel bucket it
/// falls into.
fn split_shift(shift: f32, factor: usize) -> (isize, isize) {
    let f = factor as isize;
    let shift_scaled = (shift * factor as f32).round() as isize;
    if shift_scaled.rem_euclid(f) == 0 {
        (shift_scaled / f, 0)
    } else {
        let whole = shift_scaled.div_euclid(f) + 1;
        (whole, f * whole - shift_scaled)
    }
}

fn drizzle_axis(low: usize, len: usize, shift: f32, factor: usize, dim: usize) -> Option<DrizzleAxis> {
    let f = factor as isize;
    let (whole, bucket) = split_shift(shift, factor);
    let mut from = low as isize + whole;

    let mut target = bucket;
    if from < 0 {
        target -= from * f;
        from = 0;
    }
    let buffer_len = (len * factor) as isize;
    if target >= buffer_len || from >= dim as isize {
        return None;
    }
    let fits = (buffer_len - target + f - 1) / f;
    let count = fits.min(dim as isize - from);
    Some(DrizzleAxis {
        from: from as usize,
        target: target as usize,
        count: count as usize,
    })
}

/// Add the frame region `patch + shift` to the `factor`-times upsampled
/// `buffer`, rounding the shift to the nearest position on the fine grid.
/// Each frame pixel lands on one fine-grid position; `counters` tallies the
/// sub-pixel bucket of the shift, also when the shifted patch misses the
/// frame entirely.
pub fn remap_rigid_drizzled(
    frame: &Array3<f32>,
    buffer: &mut Array3<f32>,
    counters: &mut Array2<u32>,
    shift_y: f32,
    shift_x: f32,
    patch: Rect,
    factor: usize,
) {
    let (h, w, _) = frame.dim();
    counters[[split_shift(shift_y, factor).1 as usize, split_shift(shift_x, factor).1 as usize]] += 1;
    let Some(ay) = drizzle_axis(patch.y_low, patch.height(), shift_y, factor, h) else {
        return;
    };
    let Some(ax) = drizzle_axis(patch.x_low, patch.width(), shift_x, factor, w) else {
        return;
    };

    let f = factor as isize;
    let y_end = ay.target + (ay.count - 1) * factor + 1;
    let x_end = ax.target + (ax.count - 1) * factor + 1;
    let mut target = buffer.slice_mut(s![ay.target..y_end;f, ax.target..x_end;f, ..]);
    target += &frame.slice(s![ay.from..ay.from + ay.count, ax.from..ax.from + ax.count, ..]);
}

/// Normalize every sub-pixel bucket of a drizzled patch to `stack_size`
/// contributions and fill empty buckets from their nearest non-empty
/// neighbors. Returns the number of empty buckets.
pub fn equalize_ap_patch(buffer: &mut Array3<f32>, counters: &Array2<u32>, stack_size: usize, factor: usize) -> usize {
    if factor <= 1 {
        return 0;
    }
    let f = factor as isize;
    let mut holes = Vec::new();

    for ((oy, ox), &count) in counters.indexed_iter() {
        let mut bucket = buffer.slice_mut(s![oy as isize..;f, ox as isize..;f, ..]);
        if count > 0 {
            let scale = stack_size as f32 / count as f32;
            bucket.mapv_inplace(|v| v * scale);
        } else {
            bucket.fill(0.0);
            holes.push((oy, ox));
        }
    }

    for &(oy, ox) in &holes {
        for radius in 1..f {
            let donors: Vec<(usize, usize)> = circle_around(oy as isize, ox as isize, radius)
                .into_iter()
                .filter(|&(y, x)| y >= 0 && x >= 0 && y < f && x < f)
                .map(|(y, x)| (y as usize, x as usize))
                .filter(|&cell| counters[cell] > 0)
                .collect();
            if donors.is_empty() {
                continue;
            }

            let mut mean: Option<Array3<f32>> = None;
            for &(y, x) in &donors {
                let plane = buffer.slice(s![y as isize..;f, x as isize..;f, ..]);
                match mean.as_mut() {
                    Some(sum) => *sum += &plane,
                    None => mean = Some(plane.to_owned()),
                }
            }
            if let Some(mut mean) = mean {
                mean.mapv_inplace(|v| v / donors.len() as f32);
                buffer
                    .slice_mut(s![oy as isize..;f, ox as isize..;f, ..])
                    .assign(&mean);
            }
            break;
        }
    }

    holes.len()
}

/// Nearest-neighbor upsampling by an integer factor.
pub fn upsample_nearest(data: &Array2<f32>, factor: usize) -> Array2<f32> {
    if factor <= 1 {
        return data.clone();
    }
    let (h, w) = data.dim();
    Array2::from_shape_fn((h * factor, w * factor), |(y, x)| data[[y / factor, x / factor]])
}

/// Halve both image axes by averaging 2x2 blocks. A trailing odd row or
/// column is dropped.
pub fn halve(image: &Array3<f32>) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let (hh, hw) = (h / 2, w / 2);
    let mut out = Array3::<f32>::zeros((hh, hw, c));
    for (ch, mut plane) in out.axis_iter_mut(Axis(2)).enumerate() {
        let src = image.index_axis(Axis(2), ch);
        for ((y, x), v) in plane.indexed_iter_mut() {
            *v = (src[[2 * y, 2 * x]] + src[[2 * y, 2 * x + 1]] + src[[2 * y + 1, 2 * x]] + src[[2 * y + 1, 2 * x + 1]])
                / 4.0;
        }
    }
    out
}
