use std::path::Path;

use apstack_core::pipeline::config::StackConfig;
use apstack_core::pipeline::StackingOutput;
use console::Style;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_stack_summary(config: &StackConfig, frame_count: usize, output: &Path) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("apstack"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(7)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Input"),
        s.value.apply_to(format!("{} frames", frame_count))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(output.display())
    );
    println!();

    println!("  {}", s.header.apply_to("Ranking"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(config.rank.method)
    );
    if config.frames.normalization {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Normalize"),
            s.value.apply_to(format!("black cut-off {}", config.frames.normalization_threshold))
        );
    } else {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Normalize"),
            s.disabled.apply_to("disabled")
        );
    }
    println!();

    let align = &config.align;
    println!("  {}", s.header.apply_to("Alignment"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Mode"),
        s.method.apply_to(align.mode)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(align.method)
    );
    match align.alignment_rect {
        Some(rect) => println!(
            "    {:<14}{}",
            s.label.apply_to("Rectangle"),
            s.value.apply_to(rect)
        ),
        None => println!(
            "    {:<14}{}",
            s.label.apply_to("Rectangle"),
            s.value.apply_to(format!("auto, {:.0}%", 100.0 / align.rectangle_scale_factor))
        ),
    }
    if let Some(roi) = align.roi {
        println!("    {:<14}{}", s.label.apply_to("ROI"), s.value.apply_to(roi));
    }
    println!();

    let ap = &config.alignment_points;
    println!("  {}", s.header.apply_to("Alignment points"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Box width"),
        s.value.apply_to(2 * ap.half_box_width)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Search"),
        s.method.apply_to(format!("{}, width {}", ap.method, ap.search_width))
    );
    let stack = match ap.frame_number {
        Some(number) => format!("{} frames", number),
        None => format!("{:.0}%", ap.frame_percent),
    };
    println!("    {:<14}{}", s.label.apply_to("Stack"), s.value.apply_to(stack));
    if !ap.de_warp {
        println!(
            "    {:<14}{}",
            s.label.apply_to("De-warp"),
            s.disabled.apply_to("disabled")
        );
    }
    println!(
        "    {:<14}{}",
        s.label.apply_to("Drizzle"),
        s.value.apply_to(config.stack.drizzle)
    );
    if let Some(gb) = config.stack.max_memory_gb {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Memory limit"),
            s.value.apply_to(format!("{:.1} GB", gb))
        );
    }
    println!();
}

pub fn print_stacking_report(output: &StackingOutput) {
    let s = Styles::new();
    let report = &output.report;
    let (h, w) = output.intersection_shape();

    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<22}{}",
        s.label.apply_to("Intersection"),
        s.value.apply_to(format!("{}x{}", w, h))
    );
    if let Some(rect) = report.alignment_rect {
        println!(
            "    {:<22}{}",
            s.label.apply_to("Alignment rectangle"),
            s.value.apply_to(format!("{} ({} tried)", rect, report.alignment_rects_tried))
        );
    }
    println!(
        "    {:<22}{}",
        s.label.apply_to("Mean frame"),
        s.value.apply_to(format!(
            "{} frames, quality loss {:.1}%",
            report.average_frame_number, report.quality_loss_percent
        ))
    );
    println!(
        "    {:<22}{}",
        s.label.apply_to("Alignment points"),
        s.value.apply_to(format!(
            "{} (dropped {} dim, {} without structure)",
            report.alignment_point_count, report.dropped_dim, report.dropped_structure
        ))
    );
    println!(
        "    {:<22}{}",
        s.label.apply_to("Stack size"),
        s.value.apply_to(report.stack_size)
    );
    if report.stacking_holes > 0 {
        println!(
            "    {:<22}{}",
            s.label.apply_to("Background pixels"),
            s.disabled.apply_to(report.stacking_holes)
        );
    }
    if report.drizzle_holes > 0 {
        println!(
            "    {:<22}{}",
            s.label.apply_to("Drizzle holes"),
            s.disabled.apply_to(report.drizzle_holes)
        );
    }

    if !report.shift_table.is_empty() {
        println!();
        println!("{}", report.shift_table);
    }
}
