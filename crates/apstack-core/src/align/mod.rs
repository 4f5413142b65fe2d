pub mod correlation;
mod dispatcher;
pub mod global;
pub mod phase_correlation;
pub mod search;

pub use dispatcher::{compute_shift_configured, SearchParams, SearchReference};
pub use global::{AlignmentState, GlobalAligner, RectCandidate};
pub use search::{LocalShift, SearchFailure, Window};
