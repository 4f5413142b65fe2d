use ndarray::Array3;

use apstack_core::error::StackError;
use apstack_core::frame::BitDepth;
use apstack_core::io::{load_frame, load_sequence, save_stacked};
use apstack_core::source::{FrameSource, SourceOptions};

fn gradient_image(h: usize, w: usize, channels: usize) -> Array3<u16> {
    Array3::from_shape_fn((h, w, channels), |(y, x, c)| (y * 4000 + x * 300 + c * 1000) as u16)
}

#[test]
fn test_tiff_keeps_sixteen_bits() {
    let image = gradient_image(6, 9, 1);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stacked.tiff");

    save_stacked(&image, &path).unwrap();
    let (frame, depth) = load_frame(&path).unwrap();

    assert_eq!(depth, BitDepth::Sixteen);
    assert_eq!(frame.dim(), (6, 9, 1));
    for ((y, x, c), &v) in image.indexed_iter() {
        assert_eq!(frame[[y, x, c]], v as f32, "pixel ({}, {})", y, x);
    }
}

#[test]
fn test_png_is_written_with_eight_bits() {
    let image = gradient_image(5, 7, 3);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stacked.PNG");

    save_stacked(&image, &path).unwrap();
    let (frame, depth) = load_frame(&path).unwrap();

    assert_eq!(depth, BitDepth::Eight);
    assert_eq!(frame.dim(), (5, 7, 3));
    assert_eq!(frame[[4, 6, 2]], (image[[4, 6, 2]] >> 8) as f32);
    assert_eq!(frame[[1, 2, 0]], (image[[1, 2, 0]] >> 8) as f32);
}

#[test]
fn test_save_rejects_two_channels() {
    let dir = tempfile::tempdir().unwrap();
    let result = save_stacked(&Array3::zeros((4, 4, 2)), &dir.path().join("bad.tiff"));
    assert!(matches!(result, Err(StackError::Argument(_))));
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_frame(&dir.path().join("missing.png")).is_err());
}

#[test]
fn test_load_sequence_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<_> = (0..3)
        .map(|i| {
            let image = Array3::from_elem((8, 10, 1), 1000 * (i as u16 + 1));
            let path = dir.path().join(format!("frame_{i}.tif"));
            save_stacked(&image, &path).unwrap();
            path
        })
        .collect();

    let source = load_sequence(&paths, SourceOptions::default()).unwrap();
    assert_eq!(source.count(), 3);
    assert_eq!(source.shape(), (8, 10));
    assert!(!source.is_color());
    assert_eq!(source.bit_depth(), BitDepth::Sixteen);
    assert_eq!(source.frame_mono(2).unwrap()[[3, 3]], 3000.0);
}

#[test]
fn test_load_sequence_rejects_mixed_depths() {
    let dir = tempfile::tempdir().unwrap();
    let image = Array3::from_elem((4, 4, 1), 20000u16);
    let deep = dir.path().join("a.tiff");
    let shallow = dir.path().join("b.png");
    save_stacked(&image, &deep).unwrap();
    save_stacked(&image, &shallow).unwrap();

    let result = load_sequence(&[deep, shallow], SourceOptions::default());
    assert!(matches!(result, Err(StackError::Argument(_))));
}

#[test]
fn test_load_sequence_rejects_empty_input() {
    let paths: Vec<std::path::PathBuf> = Vec::new();
    assert!(matches!(
        load_sequence(&paths, SourceOptions::default()),
        Err(StackError::EmptySequence)
    ));
}
