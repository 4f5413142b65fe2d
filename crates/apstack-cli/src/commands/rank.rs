use std::path::PathBuf;

use anyhow::{Context, Result};
use apstack_core::io::load_sequence;
use apstack_core::pipeline::config::RankMethod;
use apstack_core::quality::rank_frames;
use apstack_core::source::SourceOptions;
use clap::Args;

use crate::progress::BarReporter;

#[derive(Args)]
pub struct RankArgs {
    /// Input image files, in capture order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Ranking method: laplace, xy-gradient or sobel
    #[arg(long, default_value = "laplace")]
    pub method: String,

    /// Pixel stride of the sharpness measure
    #[arg(long, default_value = "2")]
    pub stride: usize,

    /// Gaussian blur width applied before ranking (0 = none)
    #[arg(long, default_value = "7")]
    pub gauss_width: usize,

    /// Show top N frames only
    #[arg(long, default_value = "20")]
    pub top: usize,
}

pub fn run(args: &RankArgs) -> Result<()> {
    let method: RankMethod = args.method.parse()?;
    let options = SourceOptions {
        gauss_width: args.gauss_width,
        laplacian_stride: args.stride.max(1),
    };
    let source = load_sequence(&args.files, options).context("Failed to load frames")?;

    let reporter = BarReporter::new()?;
    let ranking = rank_frames(&source, method, args.stride.max(1), None, &reporter)?;
    reporter.finish();

    let total = ranking.len();
    println!(
        "\nTop {} frames by quality [{}] (of {}):",
        args.top.min(total),
        method,
        total
    );
    println!("{:>5}  {:>8}  {:>8}  {}", "Rank", "Frame #", "Score", "File");
    println!("{}", "-".repeat(50));
    for (rank, &index) in ranking.quality_sorted_indices.iter().take(args.top).enumerate() {
        println!(
            "{:>5}  {:>8}  {:>8.6}  {}",
            rank + 1,
            index,
            ranking.frame_ranks[index],
            args.files[index].display()
        );
    }

    println!(
        "\nBest frame:  {} (raw score {:.6})",
        ranking.frame_ranks_max_index, ranking.frame_ranks_max_value
    );
    let order: Vec<String> = ranking
        .quality_sorted_indices
        .iter()
        .map(|i| i.to_string())
        .collect();
    println!("Sorted order: {}", order.join(" "));

    Ok(())
}
