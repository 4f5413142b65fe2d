use serde::{Deserialize, Serialize};

use crate::consts::WORKING_SCALE_8BIT;

/// Sample bit depth of the source frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    pub fn bits(self) -> u8 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }

    /// Largest representable sample value.
    pub fn max_value(self) -> f32 {
        match self {
            Self::Eight => 255.0,
            Self::Sixteen => 65535.0,
        }
    }

    /// Multiplier bringing native samples onto the 16-bit working scale.
    pub fn working_scale(self) -> f32 {
        match self {
            Self::Eight => WORKING_SCALE_8BIT,
            Self::Sixteen => 1.0,
        }
    }
}

impl std::fmt::Display for BitDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Half-open pixel rectangle `[y_low, y_high) x [x_low, x_high)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub y_low: usize,
    pub y_high: usize,
    pub x_low: usize,
    pub x_high: usize,
}

impl Rect {
    pub fn new(y_low: usize, y_high: usize, x_low: usize, x_high: usize) -> Self {
        Self {
            y_low,
            y_high,
            x_low,
            x_high,
        }
    }

    pub fn height(&self) -> usize {
        self.y_high.saturating_sub(self.y_low)
    }

    pub fn width(&self) -> usize {
        self.x_high.saturating_sub(self.x_low)
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    pub fn contains(&self, y: usize, x: usize) -> bool {
        y >= self.y_low && y < self.y_high && x >= self.x_low && x < self.x_high
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "y {}..{}, x {}..{}",
            self.y_low, self.y_high, self.x_low, self.x_high
        )
    }
}

/// Integer global shift `[dy, dx]` of one frame relative to the reference frame.
pub type FrameShift = [i32; 2];
