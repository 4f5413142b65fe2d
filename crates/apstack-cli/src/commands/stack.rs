use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use apstack_core::frame::Rect;
use apstack_core::io::{load_sequence, save_stacked};
use apstack_core::pipeline::config::{AlignMode, DrizzleFactor, StackConfig};
use apstack_core::pipeline::run_stacking;
use apstack_core::source::{FrameSource, SourceOptions};
use clap::Args;

use crate::progress::BarReporter;
use crate::summary::{print_stack_summary, print_stacking_report};

#[derive(Args)]
pub struct StackArgs {
    /// Input image files, in capture order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Stacking config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output file path (.tiff for 16 bits, .png or .jpg for 8 bits)
    #[arg(short, long, default_value = "stacked.tiff")]
    pub output: PathBuf,

    /// Percentage of best frames stacked at each alignment point (1-100)
    #[arg(long)]
    pub stack_percent: Option<f64>,

    /// Number of best frames stacked at each alignment point
    #[arg(long)]
    pub stack_number: Option<usize>,

    /// Drizzle factor: off, 1.5x, 2x or 3x
    #[arg(long)]
    pub drizzle: Option<String>,

    /// Alignment mode: surface or planet
    #[arg(long)]
    pub mode: Option<String>,

    /// Alignment point box width in pixels (20-140)
    #[arg(long)]
    pub ap_box_width: Option<usize>,

    /// Region of interest within the frame intersection: y0,y1,x0,x1
    #[arg(long)]
    pub roi: Option<String>,

    /// Fail if the stacking buffers need more than this many GB
    #[arg(long)]
    pub max_memory: Option<f64>,
}

fn parse_roi(text: &str) -> Result<Rect> {
    let values: Vec<usize> = text
        .split(',')
        .map(|s| s.trim().parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Invalid ROI '{}'", text))?;
    match values.as_slice() {
        &[y_low, y_high, x_low, x_high] => Ok(Rect::new(y_low, y_high, x_low, x_high)),
        _ => bail!("ROI needs four values y0,y1,x0,x1, got '{}'", text),
    }
}

fn build_config(args: &StackArgs) -> Result<StackConfig> {
    let mut config: StackConfig = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid stacking config")?
    } else {
        StackConfig::default()
    };

    if let Some(percent) = args.stack_percent {
        config.alignment_points.frame_percent = percent;
        config.alignment_points.frame_number = None;
    }
    if let Some(number) = args.stack_number {
        config.alignment_points.frame_number = Some(number);
    }
    if let Some(ref drizzle) = args.drizzle {
        config.stack.drizzle = drizzle.parse::<DrizzleFactor>()?;
    }
    if let Some(ref mode) = args.mode {
        config.align.mode = mode.parse::<AlignMode>()?;
    }
    if let Some(width) = args.ap_box_width {
        config.alignment_points.half_box_width = width / 2;
    }
    if let Some(ref roi) = args.roi {
        config.align.roi = Some(parse_roi(roi)?);
    }
    if let Some(gb) = args.max_memory {
        config.stack.max_memory_gb = Some(gb);
    }

    config.validate().context("Invalid stacking parameters")?;
    Ok(config)
}

pub fn run(args: &StackArgs) -> Result<()> {
    let config = build_config(args)?;
    print_stack_summary(&config, args.files.len(), &args.output);

    let options = SourceOptions {
        gauss_width: config.frames.gauss_width,
        laplacian_stride: config.align.sampling_stride,
    };
    let source = load_sequence(&args.files, options).context("Failed to load frames")?;
    let (h, w) = source.shape();
    println!(
        "Loaded {} frames, {}x{}, {}{}",
        source.count(),
        w,
        h,
        source.bit_depth(),
        if source.is_color() { " color" } else { "" }
    );

    let reporter = BarReporter::new()?;
    let output = run_stacking(&source, &config, &reporter)?;
    reporter.finish();

    print_stacking_report(&output);
    save_stacked(&output.stacked_image, &args.output)
        .with_context(|| format!("Failed to save {}", args.output.display()))?;
    println!("\nOutput saved to {}", args.output.display());

    Ok(())
}
