pub mod ap_grid;
pub mod blend;
pub mod drizzle;
pub mod engine;
pub mod remap;

pub use ap_grid::{AlignmentPoint, AlignmentPoints, PatchExtension};
pub use engine::{ShiftStatistics, StackEngine};
