use std::sync::{Arc, OnceLock};

use ndarray::{Array2, Array3, Axis};
use tracing::debug;

use crate::consts::{COLOR_CHANNEL_COUNT, EPSILON, LAPLACIAN_ALPHA, LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};
use crate::error::{Result, StackError};
use crate::filters::gaussian_blur::gaussian_blur_width;
use crate::filters::laplacian::strided_laplacian_magnitude;
use crate::frame::BitDepth;

/// Random access to the frames of one job and their derived representations.
///
/// All accessors are deterministic: calling them twice for the same index
/// yields identical data. Implementations are free to cache.
pub trait FrameSource: Send + Sync {
    fn count(&self) -> usize;

    /// Frame shape as `(height, width)`.
    fn shape(&self) -> (usize, usize);

    fn is_color(&self) -> bool;

    fn bit_depth(&self) -> BitDepth;

    /// Sampling stride used for [`FrameSource::frame_mono_blurred_laplacian`].
    fn laplacian_stride(&self) -> usize;

    /// Original frame at native scale, shape `(h, w, channels)`.
    fn frame(&self, index: usize) -> Result<Arc<Array3<f32>>>;

    /// Monochrome frame at native scale.
    fn frame_mono(&self, index: usize) -> Result<Arc<Array2<f32>>>;

    /// Gaussian-blurred monochrome frame on the 16-bit working scale.
    fn frame_mono_blurred(&self, index: usize) -> Result<Arc<Array2<f32>>>;

    /// Strided Laplacian magnitude of the blurred frame, 8-bit range.
    fn frame_mono_blurred_laplacian(&self, index: usize) -> Result<Arc<Array2<f32>>>;

    /// Mean monochrome brightness counting only pixels above `threshold`
    /// (native scale). Never returns zero.
    fn average_brightness(&self, index: usize, threshold: f32) -> Result<f64> {
        let mono = self.frame_mono(index)?;
        if mono.is_empty() {
            return Ok(EPSILON);
        }
        let sum: f64 = mono
            .iter()
            .filter(|&&v| v > threshold)
            .map(|&v| v as f64)
            .sum();
        Ok(sum / mono.len() as f64 + EPSILON)
    }
}

/// Parameters controlling how derived representations are computed.
#[derive(Clone, Debug)]
pub struct SourceOptions {
    /// Gaussian kernel width for the blurred representation (0 = no blur).
    pub gauss_width: usize,
    /// Down-sampling stride of the Laplacian representation.
    pub laplacian_stride: usize,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            gauss_width: 7,
            laplacian_stride: 2,
        }
    }
}

/// Convert an `(h, w, c)` frame to monochrome. Single-channel frames are
/// returned as-is, RGB frames are reduced with BT.601 weights.
pub fn luminance(frame: &Array3<f32>) -> Array2<f32> {
    if frame.dim().2 == 1 {
        return frame.index_axis(Axis(2), 0).to_owned();
    }
    let r = frame.index_axis(Axis(2), 0);
    let g = frame.index_axis(Axis(2), 1);
    let b = frame.index_axis(Axis(2), 2);
    let mut mono = Array2::<f32>::zeros(r.raw_dim());
    ndarray::Zip::from(&mut mono)
        .and(&r)
        .and(&g)
        .and(&b)
        .for_each(|m, &r, &g, &b| *m = LUMINANCE_R * r + LUMINANCE_G * g + LUMINANCE_B * b);
    mono
}

/// In-memory frame sequence with lazily computed, cached representations.
pub struct MemoryFrameSource {
    frames: Vec<Arc<Array3<f32>>>,
    bit_depth: BitDepth,
    options: SourceOptions,
    shape: (usize, usize),
    channels: usize,
    mono: Vec<OnceLock<Arc<Array2<f32>>>>,
    blurred: Vec<OnceLock<Arc<Array2<f32>>>>,
    laplacian: Vec<OnceLock<Arc<Array2<f32>>>>,
}

impl MemoryFrameSource {
    /// Build a source from `(h, w, c)` frames with 1 or 3 channels.
    pub fn new(frames: Vec<Array3<f32>>, bit_depth: BitDepth, options: SourceOptions) -> Result<Self> {
        let first = frames.first().ok_or(StackError::EmptySequence)?;
        let (h, w, channels) = first.dim();
        if h == 0 || w == 0 {
            return Err(StackError::InvalidDimensions {
                width: w,
                height: h,
            });
        }
        if channels != 1 && channels != COLOR_CHANNEL_COUNT {
            return Err(StackError::Argument(format!(
                "frames must have 1 or 3 channels, got {}",
                channels
            )));
        }
        if let Some(bad) = frames.iter().find(|f| f.dim() != (h, w, channels)) {
            let (bh, bw, _) = bad.dim();
            return Err(StackError::InvalidDimensions {
                width: bw,
                height: bh,
            });
        }

        let n = frames.len();
        debug!(frames = n, height = h, width = w, channels, "Created in-memory frame source");
        Ok(Self {
            frames: frames.into_iter().map(Arc::new).collect(),
            bit_depth,
            options,
            shape: (h, w),
            channels,
            mono: (0..n).map(|_| OnceLock::new()).collect(),
            blurred: (0..n).map(|_| OnceLock::new()).collect(),
            laplacian: (0..n).map(|_| OnceLock::new()).collect(),
        })
    }

    /// Build a source from monochrome `(h, w)` frames.
    pub fn from_mono(frames: Vec<Array2<f32>>, bit_depth: BitDepth, options: SourceOptions) -> Result<Self> {
        let frames = frames
            .into_iter()
            .map(|f| f.insert_axis(Axis(2)))
            .collect();
        Self::new(frames, bit_depth, options)
    }

    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.frames.len() {
            return Err(StackError::FrameIndexOutOfRange {
                index,
                total: self.frames.len(),
            });
        }
        Ok(())
    }
}

impl FrameSource for MemoryFrameSource {
    fn count(&self) -> usize {
        self.frames.len()
    }

    fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn is_color(&self) -> bool {
        self.channels == COLOR_CHANNEL_COUNT
    }

    fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    fn laplacian_stride(&self) -> usize {
        self.options.laplacian_stride.max(1)
    }

    fn frame(&self, index: usize) -> Result<Arc<Array3<f32>>> {
        self.check_index(index)?;
        Ok(Arc::clone(&self.frames[index]))
    }

    fn frame_mono(&self, index: usize) -> Result<Arc<Array2<f32>>> {
        self.check_index(index)?;
        let mono = self.mono[index].get_or_init(|| Arc::new(luminance(&self.frames[index])));
        Ok(Arc::clone(mono))
    }

    fn frame_mono_blurred(&self, index: usize) -> Result<Arc<Array2<f32>>> {
        let mono = self.frame_mono(index)?;
        let scale = self.bit_depth.working_scale();
        let blurred = self.blurred[index].get_or_init(|| {
            let scaled = mono.mapv(|v| v * scale);
            Arc::new(gaussian_blur_width(&scaled, self.options.gauss_width))
        });
        Ok(Arc::clone(blurred))
    }

    fn frame_mono_blurred_laplacian(&self, index: usize) -> Result<Arc<Array2<f32>>> {
        let blurred = self.frame_mono_blurred(index)?;
        let stride = self.laplacian_stride();
        let lap = self.laplacian[index].get_or_init(|| {
            Arc::new(strided_laplacian_magnitude(&blurred, stride, LAPLACIAN_ALPHA))
        });
        Ok(Arc::clone(lap))
    }
}
