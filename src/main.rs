//! KPI Evaluation CLI
//!
//! Replays recorded scenario frames through a KPI group and writes the report.
//!
//! Usage:
//!   cargo run --bin kpi_eval -- --kpis kpis.json --frames scene.jsonl
//!   cargo run --bin kpi_eval -- --kpis kpis.toml --frames scene.jsonl --out report.json
//!   cargo run --bin kpi_eval -- --kpis kpis.json --frames ego2.jsonl --report-dir reports/
//!
//! Exits with status 1 when the scenario verdict is FAIL.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use scenario_kpi::grading::config::{EvalSettings, KpiGroup};
use scenario_kpi::grading::replay::{load_frames, ScenarioRunner};
use scenario_kpi::grading::report::ScenarioReport;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kpi_eval")]
#[command(about = "Evaluate scenario KPIs over recorded frames")]
struct Args {
    /// KPI group file (JSON, or TOML by extension)
    #[arg(long)]
    kpis: PathBuf,

    /// Recorded frames (JSON Lines, one tick per line)
    #[arg(long)]
    frames: PathBuf,

    /// Engine settings (TOML)
    #[arg(long, env = "KPI_EVAL_CONFIG_PATH")]
    settings: Option<PathBuf>,

    /// Write the full report as JSON
    #[arg(long)]
    out: Option<PathBuf>,

    /// Save as P./F.<name>.json in this directory, merged with any report
    /// already saved there for the same scene
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Scene name recorded in the report
    #[arg(long)]
    scene: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scenario_kpi=info,kpi_eval=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<ExitCode> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => EvalSettings::load(path)
            .with_context(|| format!("loading settings {}", path.display()))?,
        None => EvalSettings::default(),
    };
    if let Some(scene) = &args.scene {
        settings.scene_name = scene.clone();
    }

    let group = KpiGroup::load(&args.kpis)?;
    let frames = load_frames(&args.frames)?;
    info!(
        kpis = group.kpis.len(),
        enabled = group.enabled_count(),
        frames = frames.len(),
        "starting evaluation"
    );

    let (mut runner, rejected) = ScenarioRunner::from_group(&group, settings);
    for err in &rejected {
        warn!(error = %err, "kpi ignored");
    }
    let init = runner.init();
    for (name, err) in &init.rejected {
        warn!(kpi = %name, error = %err, "kpi will be skipped");
    }

    let report = runner.run(frames);
    print_summary(&report);

    if let Some(out) = &args.out {
        report.write_json(out)?;
        println!("Report written to {}", out.display());
    }

    let report = match &args.report_dir {
        Some(dir) => {
            let stem = match args.scene.as_deref() {
                Some(scene) if !scene.is_empty() => scene.to_string(),
                _ => args
                    .frames
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "scenario".to_string()),
            };
            let (path, merged) = report.save_merged(dir, &format!("{}.json", stem))?;
            println!(
                "Merged report ({} cases) written to {}",
                merged.cases.len(),
                path.display()
            );
            merged
        }
        None => report,
    };

    Ok(if report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(report: &ScenarioReport) {
    let scene = if report.scene_name.is_empty() {
        "<unnamed>"
    } else {
        report.scene_name.as_str()
    };
    println!("=== Scenario {} ===", scene);
    println!("Ticks: {}  Sim time: {:.2}s", report.ticks, report.sim_duration_s);
    if let Some(reason) = &report.stop_reason {
        println!("Stopped early: {}", reason);
    }
    println!();
    for case in &report.cases {
        if let Some(result) = &case.result {
            println!(
                "  {:<22} {:<9} detected={:<4} {}",
                result.name, result.verdict, result.detected_count, result.reason
            );
        }
    }
    println!();
    let s = &report.summary;
    println!(
        "Total {}  passed {}  failed {}  skipped {}  undefined {}",
        s.total, s.passed, s.failed, s.skipped, s.undefined
    );
    if report.passed {
        println!("Result: PASS");
    } else {
        println!("Result: FAIL ({})", report.reason);
    }
}
