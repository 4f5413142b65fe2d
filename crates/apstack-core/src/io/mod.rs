pub mod image_io;

pub use image_io::{load_frame, load_sequence, save_stacked};
