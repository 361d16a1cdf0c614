//! Report Inspector CLI
//!
//! Prints verdicts, summary counts and attachment shapes of a saved report.
//!
//! Usage:
//!   cargo run --bin report_inspector -- --report report.json
//!   cargo run --bin report_inspector -- --report report.json --kpi MaxSpeed

use anyhow::{bail, Result};
use clap::Parser;
use scenario_kpi::grading::report::{Attachment, KpiCase, ScenarioReport};

#[derive(Parser, Debug)]
#[command(name = "report_inspector")]
#[command(about = "Inspect a saved scenario KPI report")]
struct Args {
    /// Report JSON written by kpi_eval
    #[arg(long)]
    report: String,

    /// Only show this KPI
    #[arg(long)]
    kpi: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let report = ScenarioReport::load(&args.report)?;

    println!("=== Report {} ===", report.id);
    println!("Scene: {}", report.scene_name);
    println!("Started: {}  Finished: {}", report.started_at, report.finished_at);
    println!("Ticks: {}  Sim time: {:.2}s", report.ticks, report.sim_duration_s);
    if let Some(reason) = &report.stop_reason {
        println!("Stopped early: {}", reason);
    }
    let s = &report.summary;
    println!(
        "Verdict: {}  (total {}, passed {}, failed {}, skipped {}, undefined {})",
        if report.passed { "PASS" } else { "FAIL" },
        s.total,
        s.passed,
        s.failed,
        s.skipped,
        s.undefined
    );
    println!();

    let cases: Vec<&KpiCase> = match &args.kpi {
        Some(name) => match report.case(name) {
            Some(case) => vec![case],
            None => bail!("no kpi named '{}' in report", name),
        },
        None => report.cases.iter().collect(),
    };
    for case in cases {
        inspect_case(case);
    }
    Ok(())
}

fn inspect_case(case: &KpiCase) {
    println!("--- {} ---", case.info.name);
    if let Some(result) = &case.result {
        println!("  result: {} ({})", result.verdict, result.reason);
        println!("  detected: {}  {}", result.detected_count, case.info.pass_condition);
        if let Some(score) = result.score {
            println!("  score: {:.2}", score);
        }
    }
    if !case.info.threshold_info.is_empty() {
        println!("  thresholds: {}", case.info.threshold_info);
    }
    if case.request_stop {
        println!("  voted to stop the scenario");
    }
    for attachment in &case.attachments {
        match attachment {
            Attachment::XyPlot(plot) => println!(
                "  plot '{}': {} samples, y = [{}]",
                plot.title,
                plot.len(),
                plot.y_labels().join(", ")
            ),
            Attachment::Pair(pair) => println!("  {} = {}", pair.key, pair.value),
            Attachment::Sheet(sheet) => println!(
                "  sheet '{}': {} columns, {} rows",
                sheet.title,
                sheet.columns.len(),
                sheet.row_count()
            ),
        }
    }
    println!();
}
