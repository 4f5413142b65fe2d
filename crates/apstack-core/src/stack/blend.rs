use ndarray::Array2;

/// Blend weights along one patch axis.
///
/// Below the AP center the weights ramp up as `(1..=c) / (c + 1)`, from the
/// center upwards they ramp down as `(high - center ..= 1) / (high - center)`.
/// A side adjacent to the frame border keeps weight 1.
pub fn one_dim_weight(
    patch_low: usize,
    patch_high: usize,
    box_center: usize,
    extend_low: bool,
    extend_high: bool,
) -> Vec<f32> {
    let below = box_center.saturating_sub(patch_low);
    let above = patch_high.saturating_sub(box_center);
    let mut weights = Vec::with_capacity(below + above);

    if extend_low {
        weights.resize(below, 1.0);
    } else {
        let denominator = (below + 1) as f32;
        weights.extend((1..=below).map(|k| k as f32 / denominator));
    }

    if extend_high {
        weights.resize(below + above, 1.0);
    } else {
        let denominator = above as f32;
        weights.extend((1..=above).rev().map(|k| k as f32 / denominator));
    }

    weights
}

/// Two-dimensional blend weights `min(wy[y], wx[x])` of a patch.
pub fn patch_weights(weights_y: &[f32], weights_x: &[f32]) -> Array2<f32> {
    Array2::from_shape_fn((weights_y.len(), weights_x.len()), |(y, x)| {
        weights_y[y].min(weights_x[x])
    })
}
