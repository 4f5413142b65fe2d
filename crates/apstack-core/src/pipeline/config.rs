use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{AP_STEP_TO_PATCH_RATIO, PATCH_TO_BOX_RATIO};
use crate::error::{Result, StackError};
use crate::frame::Rect;

/// Sharpness measure used to rank whole frames or AP patches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankMethod {
    /// Standard deviation of the Laplacian.
    #[default]
    Laplace,
    /// Mean magnitude of forward differences.
    XyGradient,
    /// Mean Sobel magnitude.
    Sobel,
}

impl std::fmt::Display for RankMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Laplace => write!(f, "Laplace"),
            Self::XyGradient => write!(f, "xy gradient"),
            Self::Sobel => write!(f, "Sobel"),
        }
    }
}

impl FromStr for RankMethod {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
            "laplace" => Ok(Self::Laplace),
            "xy gradient" | "xygradient" => Ok(Self::XyGradient),
            "sobel" => Ok(Self::Sobel),
            _ => Err(StackError::NotSupported(format!("ranking method {s}"))),
        }
    }
}

/// How global frame shifts are measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignMode {
    /// Register on a structured patch (lunar, solar, large planets).
    #[default]
    Surface,
    /// Register on the brightness center of gravity of the whole disk.
    Planet,
}

impl std::fmt::Display for AlignMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Surface => write!(f, "Surface"),
            Self::Planet => write!(f, "Planet"),
        }
    }
}

impl FromStr for AlignMode {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "surface" => Ok(Self::Surface),
            "planet" => Ok(Self::Planet),
            _ => Err(StackError::NotSupported(format!("alignment mode {s}"))),
        }
    }
}

/// Shift search strategy, used for both global and local (AP) registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    /// FFT phase correlation on a fixed window.
    Translation,
    /// Coarse-to-fine normalized cross-correlation.
    #[default]
    MultiLevelCorrelation,
    /// Ring-by-ring search around the start position.
    RadialSearch,
    /// Greedy descent over radius-1 neighborhoods.
    SteepestDescent,
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Translation => write!(f, "Translation"),
            Self::MultiLevelCorrelation => write!(f, "Multi-level Correlation"),
            Self::RadialSearch => write!(f, "Radial Search"),
            Self::SteepestDescent => write!(f, "Steepest Descent"),
        }
    }
}

impl FromStr for SearchMethod {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "translation" => Ok(Self::Translation),
            "multilevelcorrelation" => Ok(Self::MultiLevelCorrelation),
            "radialsearch" => Ok(Self::RadialSearch),
            "steepestdescent" => Ok(Self::SteepestDescent),
            _ => Err(StackError::NotSupported(format!("search method {s}"))),
        }
    }
}

/// Drizzle upsampling of the stacked image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrizzleFactor {
    #[default]
    #[serde(rename = "Off")]
    Off,
    /// Drizzled by 3, then halved.
    #[serde(rename = "1.5x")]
    OnePointFive,
    #[serde(rename = "2x")]
    Two,
    #[serde(rename = "3x")]
    Three,
}

impl DrizzleFactor {
    /// Integer upsampling factor of the AP buffers.
    pub fn factor(self) -> usize {
        match self {
            Self::Off => 1,
            Self::Two => 2,
            Self::OnePointFive | Self::Three => 3,
        }
    }

    /// Whether the drizzled result is halved before output.
    pub fn is_one_and_a_half(self) -> bool {
        matches!(self, Self::OnePointFive)
    }
}

impl std::fmt::Display for DrizzleFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "Off"),
            Self::OnePointFive => write!(f, "1.5x"),
            Self::Two => write!(f, "2x"),
            Self::Three => write!(f, "3x"),
        }
    }
}

impl FromStr for DrizzleFactor {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "1" | "1x" => Ok(Self::Off),
            "1.5x" | "1.5" => Ok(Self::OnePointFive),
            "2x" | "2" => Ok(Self::Two),
            "3x" | "3" => Ok(Self::Three),
            _ => Err(StackError::NotSupported(format!("drizzle factor {s}"))),
        }
    }
}

/// Complete parameter set of a stacking job.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub rank: RankConfig,
    #[serde(default)]
    pub align: AlignConfig,
    #[serde(default)]
    pub alignment_points: AlignmentPointsConfig,
    #[serde(default)]
    pub stack: StackingConfig,
}

/// Derived frame representations and brightness normalization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FramesConfig {
    /// Gaussian kernel width used for the blurred frames (0 = no blur).
    pub gauss_width: usize,
    /// Compensate brightness differences between frames.
    pub normalization: bool,
    /// Black cut-off (8-bit scale) for the brightness average.
    pub normalization_threshold: f32,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            gauss_width: 7,
            normalization: true,
            normalization_threshold: 15.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    pub method: RankMethod,
    pub pixel_stride: usize,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            method: RankMethod::Laplace,
            pixel_stride: 2,
        }
    }
}

/// Global frame alignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    pub mode: AlignMode,
    pub method: SearchMethod,
    /// Frame extent divided by alignment rectangle extent.
    pub rectangle_scale_factor: f64,
    /// Maximum global shift searched between consecutive frames.
    pub search_width: usize,
    pub border_width: usize,
    /// Stride of the radial/steepest-descent deviation sums and of the
    /// stored Laplacians.
    pub sampling_stride: usize,
    pub rectangle_stride: usize,
    /// Pixels darker than this (16-bit scale) are ignored when scoring
    /// candidate rectangles.
    pub rectangle_black_threshold: f32,
    pub rectangle_min_fraction: f64,
    /// Share of best frames averaged into the mean frame.
    pub average_frame_percent: f64,
    /// Select mean-frame contributors from a short time window.
    pub fast_changing_object: bool,
    pub best_frames_window_extension: usize,
    /// Fixed alignment rectangle; computed automatically when absent.
    pub alignment_rect: Option<Rect>,
    /// Region of interest relative to the frame intersection.
    pub roi: Option<Rect>,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            mode: AlignMode::Surface,
            method: SearchMethod::MultiLevelCorrelation,
            rectangle_scale_factor: 3.0,
            search_width: 34,
            border_width: 10,
            sampling_stride: 2,
            rectangle_stride: 2,
            rectangle_black_threshold: 10240.0,
            rectangle_min_fraction: 0.7,
            average_frame_percent: 5.0,
            fast_changing_object: true,
            best_frames_window_extension: 2,
            alignment_rect: None,
            roi: None,
        }
    }
}

impl AlignConfig {
    /// Set the rectangle size as a percentage of the frame extent.
    pub fn set_rectangle_percent(&mut self, percent: f64) {
        self.rectangle_scale_factor = 100.0 / percent;
    }
}

/// Alignment point layout, ranking and local search.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentPointsConfig {
    pub half_box_width: usize,
    pub search_width: usize,
    pub structure_threshold: f64,
    /// Minimum box brightness (8-bit scale).
    pub brightness_threshold: f32,
    /// Minimum box contrast (8-bit scale).
    pub contrast_threshold: f32,
    /// Dark-pixel fraction above which a box is moved to its brightness center.
    pub dim_fraction_threshold: f64,
    pub frame_percent: f64,
    /// Absolute stack size; overrides `frame_percent` when set.
    pub frame_number: Option<usize>,
    pub rank_method: RankMethod,
    pub rank_pixel_stride: usize,
    /// Compute local shifts; stack with global shifts only when disabled.
    pub de_warp: bool,
    pub method: SearchMethod,
    pub sampling_stride: usize,
    pub local_search_subpixel: bool,
    /// Quadratic off-center penalty of the coarse correlation phase.
    pub penalty_factor: f32,
}

impl Default for AlignmentPointsConfig {
    fn default() -> Self {
        Self {
            half_box_width: 24,
            search_width: 14,
            structure_threshold: 0.04,
            brightness_threshold: 10.0,
            contrast_threshold: 0.0,
            dim_fraction_threshold: 0.6,
            frame_percent: 10.0,
            frame_number: None,
            rank_method: RankMethod::Laplace,
            rank_pixel_stride: 2,
            de_warp: true,
            method: SearchMethod::MultiLevelCorrelation,
            sampling_stride: 2,
            local_search_subpixel: false,
            penalty_factor: 0.00025,
        }
    }
}

impl AlignmentPointsConfig {
    /// Half width of the stacking patch around each AP.
    pub fn half_patch_width(&self) -> usize {
        (self.half_box_width as f64 * PATCH_TO_BOX_RATIO).round() as usize
    }

    /// Distance between neighboring AP centers.
    pub fn step_size(&self) -> usize {
        (self.half_patch_width() as f64 * AP_STEP_TO_PATCH_RATIO).round() as usize
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingConfig {
    pub drizzle: DrizzleFactor,
    /// Relative AP weight below which the background is blended in.
    pub blend_threshold: f32,
    /// Hole fraction above which a full background frame is averaged.
    pub background_fraction: f64,
    pub background_patch_size: usize,
    /// Upper limit in GB for the stacking buffers; `None` disables the check.
    pub max_memory_gb: Option<f64>,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            drizzle: DrizzleFactor::Off,
            blend_threshold: 0.2,
            background_fraction: 0.3,
            background_patch_size: 100,
            max_memory_gb: None,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(name: &str, value: T, low: T, high: T) -> Result<()> {
    if value < low || value > high {
        return Err(StackError::Argument(format!(
            "{name} = {value} is outside the valid range {low}..={high}"
        )));
    }
    Ok(())
}

fn check_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(StackError::Argument(format!("{name} must be at least 1")));
    }
    Ok(())
}

impl StackConfig {
    /// Check all parameters against their valid ranges. Reports the first
    /// violation.
    pub fn validate(&self) -> Result<()> {
        check_range("frames.gauss_width", self.frames.gauss_width, 0, 11)?;
        check_range(
            "frames.normalization_threshold",
            self.frames.normalization_threshold,
            0.0,
            40.0,
        )?;
        check_positive("rank.pixel_stride", self.rank.pixel_stride)?;

        let align = &self.align;
        check_range(
            "align.rectangle_scale_factor",
            align.rectangle_scale_factor,
            100.0 / 80.0,
            100.0 / 5.0,
        )?;
        check_range("align.search_width", align.search_width, 5, 150)?;
        check_positive("align.sampling_stride", align.sampling_stride)?;
        check_positive("align.rectangle_stride", align.rectangle_stride)?;
        check_range("align.rectangle_min_fraction", align.rectangle_min_fraction, 0.0, 1.0)?;
        check_range("align.average_frame_percent", align.average_frame_percent, 1.0, 100.0)?;
        check_positive(
            "align.best_frames_window_extension",
            align.best_frames_window_extension,
        )?;
        if let Some(rect) = align.alignment_rect {
            if rect.is_empty() {
                return Err(StackError::Argument(format!(
                    "align.alignment_rect ({rect}) is empty"
                )));
            }
        }
        if let Some(roi) = align.roi {
            if roi != Rect::default() && roi.is_empty() {
                return Err(StackError::Argument(format!("align.roi ({roi}) is empty")));
            }
        }

        let ap = &self.alignment_points;
        check_range("alignment_points.half_box_width", ap.half_box_width, 10, 70)?;
        check_range("alignment_points.search_width", ap.search_width, 6, 30)?;
        check_range(
            "alignment_points.structure_threshold",
            ap.structure_threshold,
            0.01,
            0.30,
        )?;
        check_range(
            "alignment_points.brightness_threshold",
            ap.brightness_threshold,
            2.0,
            50.0,
        )?;
        check_range(
            "alignment_points.contrast_threshold",
            ap.contrast_threshold,
            0.0,
            255.0,
        )?;
        check_range(
            "alignment_points.dim_fraction_threshold",
            ap.dim_fraction_threshold,
            0.0,
            1.0,
        )?;
        check_range("alignment_points.frame_percent", ap.frame_percent, 1.0, 100.0)?;
        if let Some(n) = ap.frame_number {
            check_positive("alignment_points.frame_number", n)?;
        }
        check_positive("alignment_points.rank_pixel_stride", ap.rank_pixel_stride)?;
        check_positive("alignment_points.sampling_stride", ap.sampling_stride)?;
        check_range("alignment_points.penalty_factor", ap.penalty_factor, 0.0, 1.0)?;

        let stack = &self.stack;
        check_range("stack.blend_threshold", stack.blend_threshold, 0.001, 1.0)?;
        check_range("stack.background_fraction", stack.background_fraction, 0.0, 1.0)?;
        check_positive("stack.background_patch_size", stack.background_patch_size)?;
        if let Some(gb) = stack.max_memory_gb {
            if !(gb > 0.0) {
                return Err(StackError::Argument(format!(
                    "stack.max_memory_gb = {gb} must be positive"
                )));
            }
        }

        Ok(())
    }
}
