use std::str::FromStr;

use approx::assert_relative_eq;

use apstack_core::error::StackError;
use apstack_core::frame::Rect;
use apstack_core::pipeline::config::{
    AlignMode, AlignmentPointsConfig, DrizzleFactor, RankMethod, SearchMethod, StackConfig,
};

#[test]
fn test_defaults_are_valid() {
    let config = StackConfig::default();
    config.validate().unwrap();
    assert_eq!(config.align.mode, AlignMode::Surface);
    assert_eq!(config.align.method, SearchMethod::MultiLevelCorrelation);
    assert_eq!(config.rank.method, RankMethod::Laplace);
    assert_eq!(config.stack.drizzle, DrizzleFactor::Off);
    assert!(config.frames.normalization);
}

#[test]
fn test_derived_alignment_point_geometry() {
    let config = AlignmentPointsConfig::default();
    assert_eq!(config.half_patch_width(), 36);
    assert_eq!(config.step_size(), 54);

    let small = AlignmentPointsConfig {
        half_box_width: 10,
        ..AlignmentPointsConfig::default()
    };
    assert_eq!(small.half_patch_width(), 15);
    assert_eq!(small.step_size(), 23);
}

#[test]
fn test_rectangle_percent() {
    let mut config = StackConfig::default();
    config.align.set_rectangle_percent(25.0);
    assert_relative_eq!(config.align.rectangle_scale_factor, 4.0);
    config.validate().unwrap();

    config.align.set_rectangle_percent(90.0);
    assert!(matches!(config.validate(), Err(StackError::Argument(_))));
}

#[test]
fn test_json_round_trip() {
    let mut config = StackConfig::default();
    config.stack.drizzle = DrizzleFactor::OnePointFive;
    config.align.roi = Some(Rect::new(10, 90, 20, 120));
    config.alignment_points.frame_number = Some(25);
    config.alignment_points.method = SearchMethod::SteepestDescent;

    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"1.5x\""));
    let restored: StackConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.stack.drizzle, DrizzleFactor::OnePointFive);
    assert_eq!(restored.align.roi, Some(Rect::new(10, 90, 20, 120)));
    assert_eq!(restored.alignment_points.frame_number, Some(25));
    assert_eq!(restored.alignment_points.method, SearchMethod::SteepestDescent);
    assert_eq!(restored.alignment_points.half_box_width, config.alignment_points.half_box_width);
}

#[test]
fn test_toml_round_trip() {
    let mut config = StackConfig::default();
    config.align.mode = AlignMode::Planet;
    config.stack.drizzle = DrizzleFactor::Three;
    config.alignment_points.half_box_width = 30;

    let text = toml::to_string_pretty(&config).unwrap();
    assert!(text.contains("[alignment_points]"));
    let restored: StackConfig = toml::from_str(&text).unwrap();
    assert_eq!(restored.align.mode, AlignMode::Planet);
    assert_eq!(restored.stack.drizzle, DrizzleFactor::Three);
    assert_eq!(restored.alignment_points.half_box_width, 30);
    assert_eq!(restored.alignment_points.step_size(), config.alignment_points.step_size());
    restored.validate().unwrap();

    let sparse: StackConfig = toml::from_str("[stack]\ndrizzle = \"1.5x\"\n").unwrap();
    assert_eq!(sparse.stack.drizzle, DrizzleFactor::OnePointFive);
    assert_eq!(sparse.frames.gauss_width, 7);
    assert_eq!(sparse.stack.max_memory_gb, None);

    let budget: StackConfig = toml::from_str("[stack]\nmax_memory_gb = 2.5\n").unwrap();
    assert_eq!(budget.stack.max_memory_gb, Some(2.5));
    budget.validate().unwrap();
}

#[test]
fn test_partial_json_uses_defaults() {
    let config: StackConfig =
        serde_json::from_str(r#"{"stack": {"drizzle": "2x"}, "align": {"mode": "Planet"}}"#).unwrap();
    assert_eq!(config.stack.drizzle, DrizzleFactor::Two);
    assert_eq!(config.align.mode, AlignMode::Planet);
    assert_eq!(config.align.search_width, 34);
    assert_eq!(config.alignment_points.search_width, 14);
    assert_relative_eq!(config.stack.blend_threshold, 0.2);
    config.validate().unwrap();
}

#[test]
fn test_drizzle_factors() {
    assert_eq!(DrizzleFactor::Off.factor(), 1);
    assert_eq!(DrizzleFactor::OnePointFive.factor(), 3);
    assert_eq!(DrizzleFactor::Two.factor(), 2);
    assert_eq!(DrizzleFactor::Three.factor(), 3);
    assert!(DrizzleFactor::OnePointFive.is_one_and_a_half());
    assert!(!DrizzleFactor::Three.is_one_and_a_half());

    for factor in [
        DrizzleFactor::Off,
        DrizzleFactor::OnePointFive,
        DrizzleFactor::Two,
        DrizzleFactor::Three,
    ] {
        assert_eq!(DrizzleFactor::from_str(&factor.to_string()).unwrap(), factor);
    }
    assert_eq!("2".parse::<DrizzleFactor>().unwrap(), DrizzleFactor::Two);
    assert!(matches!("4x".parse::<DrizzleFactor>(), Err(StackError::NotSupported(_))));
}

#[test]
fn test_method_names_parse() {
    for method in [
        SearchMethod::Translation,
        SearchMethod::MultiLevelCorrelation,
        SearchMethod::RadialSearch,
        SearchMethod::SteepestDescent,
    ] {
        assert_eq!(method.to_string().parse::<SearchMethod>().unwrap(), method);
    }
    assert_eq!("radial-search".parse::<SearchMethod>().unwrap(), SearchMethod::RadialSearch);
    assert!(matches!("fft".parse::<SearchMethod>(), Err(StackError::NotSupported(_))));

    for method in [RankMethod::Laplace, RankMethod::XyGradient, RankMethod::Sobel] {
        assert_eq!(method.to_string().parse::<RankMethod>().unwrap(), method);
    }
    assert_eq!("xy-gradient".parse::<RankMethod>().unwrap(), RankMethod::XyGradient);

    assert_eq!("PLANET".parse::<AlignMode>().unwrap(), AlignMode::Planet);
    assert!("moon".parse::<AlignMode>().is_err());
}

#[test]
fn test_out_of_range_values_are_rejected() {
    let cases: [fn(&mut StackConfig); 12] = [
        |c| c.frames.gauss_width = 13,
        |c| c.align.search_width = 4,
        |c| c.align.sampling_stride = 0,
        |c| c.alignment_points.half_box_width = 80,
        |c| c.alignment_points.search_width = 40,
        |c| c.alignment_points.structure_threshold = 0.5,
        |c| c.alignment_points.frame_number = Some(0),
        |c| c.stack.blend_threshold = 0.0,
        |c| c.stack.background_patch_size = 0,
        |c| c.stack.max_memory_gb = Some(0.0),
        |c| c.align.alignment_rect = Some(Rect::new(10, 10, 0, 20)),
        |c| c.align.roi = Some(Rect::new(5, 50, 30, 30)),
    ];
    for (index, apply) in cases.into_iter().enumerate() {
        let mut config = StackConfig::default();
        apply(&mut config);
        assert!(
            matches!(config.validate(), Err(StackError::Argument(_))),
            "case {} should be rejected",
            index
        );
    }
}

#[test]
fn test_zero_roi_means_full_intersection() {
    let mut config = StackConfig::default();
    config.align.roi = Some(Rect::default());
    config.validate().unwrap();
}
