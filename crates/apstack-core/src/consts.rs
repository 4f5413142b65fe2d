/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum item count (frames or alignment points) to use Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-10;

/// Added to brightness values before they are used as divisors.
pub const BRIGHTNESS_EPSILON: f64 = 1e-7;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Number of channels in a color frame (R, G, B).
pub const COLOR_CHANNEL_COUNT: usize = 3;

/// Factor mapping 8-bit values onto the 16-bit working scale.
pub const WORKING_SCALE_8BIT: f32 = 256.0;

/// Scale applied to the absolute Laplacian before it is saturated to 8 bits.
pub const LAPLACIAN_ALPHA: f32 = 1.0 / 256.0;

/// Initial value of the per-pixel blend weight sum.
pub const WEIGHT_SUM_FLOOR: f32 = 1e-30;

/// Accumulated blend weight below which a pixel counts as a stacking hole.
pub const HOLE_WEIGHT_THRESHOLD: f32 = 1e-10;

/// Placeholder deviation for probe positions not yet evaluated.
pub const UNSET_DEVIATION: f64 = 1e30;

/// Search width of the full-resolution phase of multi-level correlation.
pub const FINE_SEARCH_WIDTH: usize = 4;

/// Ratio between AP patch half width and AP box half width.
pub const PATCH_TO_BOX_RATIO: f64 = 1.5;

/// Distance between neighboring AP centers, relative to the patch half width.
pub const AP_STEP_TO_PATCH_RATIO: f64 = 4.5 / 3.0;
