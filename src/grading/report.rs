//! Report Builder
//!
//! Per-KPI report artifacts and the scenario-level report.
//!
//! # Artifacts
//!
//! - [`XYPlot`] - x samples plus N aligned y series, each optionally carrying
//!   an upper/lower threshold overlay (constant or per-sample)
//! - [`PairData`] - key/value scalar
//! - [`SheetTable`] - named string columns of equal length
//!
//! Every evaluator owns one [`ReportBuilder`], built fresh at Init. Samples
//! are appended atomically (x and every y in one call), so a plot can never
//! fall out of alignment mid-run; [`ReportBuilder::finalize`] re-checks it.
//!
//! A tick skipped for missing telemetry still appends a gap sample: the x
//! value plus NaN on every y series (`null` in JSON). Plots of one run
//! therefore all hold one sample per dispatched tick.
//!
//! # Merged reports
//!
//! Several runs of one scene (one per ego, or a scene resumed after a
//! restart) can share one report file. Saved files carry their verdict as a
//! name prefix, `P.`, `F.` or `U.`; [`ScenarioReport::save_merged`] folds the
//! current run into whatever report is already saved under the same name.

use crate::grading::config::KpiDefinition;
use crate::grading::error::ReportError;
use crate::grading::verdict::{CaseSummary, KpiResult, ScenarioVerdict};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use statrs::statistics::Statistics;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// =============================================================================
// XY PLOT
// =============================================================================

/// One named sample series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub unit: String,
    /// NaN marks a gap; serialized as `null`.
    #[serde(deserialize_with = "de_samples")]
    pub data: Vec<f64>,
}

/// Read a sample series where `null` stands for a gap.
fn de_samples<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

impl Axis {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            data: Vec::new(),
        }
    }
}

/// Threshold band values attached to a y series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayValues {
    /// Same bound for every sample.
    Constant(f64),
    /// One bound per sample; `None` means no bound at that sample.
    PerSample(Vec<Option<f64>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverlay {
    pub description: String,
    pub values: OverlayValues,
}

impl ThresholdOverlay {
    pub fn constant(description: impl Into<String>, value: f64) -> Self {
        Self {
            description: description.into(),
            values: OverlayValues::Constant(value),
        }
    }

    pub fn per_sample(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            values: OverlayValues::PerSample(Vec::new()),
        }
    }

    /// Bound in effect at sample `index`.
    pub fn value_at(&self, index: usize) -> Option<f64> {
        match &self.values {
            OverlayValues::Constant(v) => Some(*v),
            OverlayValues::PerSample(values) => values.get(index).copied().flatten(),
        }
    }

    fn push(&mut self, value: Option<f64>) {
        if let OverlayValues::PerSample(values) = &mut self.values {
            values.push(value);
        }
    }

    fn sample_len(&self) -> Option<usize> {
        match &self.values {
            OverlayValues::Constant(_) => None,
            OverlayValues::PerSample(values) => Some(values.len()),
        }
    }
}

/// A y series with optional threshold overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YAxis {
    pub axis: Axis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<ThresholdOverlay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<ThresholdOverlay>,
}

impl YAxis {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            axis: Axis::new(name, unit),
            upper: None,
            lower: None,
        }
    }

    pub fn with_upper(mut self, overlay: ThresholdOverlay) -> Self {
        self.upper = Some(overlay);
        self
    }

    pub fn with_lower(mut self, overlay: ThresholdOverlay) -> Self {
        self.lower = Some(overlay);
        self
    }
}

/// One y value plus the per-sample bounds in effect for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub y: f64,
    pub upper: Option<f64>,
    pub lower: Option<f64>,
}

impl Sample {
    pub fn new(y: f64) -> Self {
        Self {
            y,
            upper: None,
            lower: None,
        }
    }

    pub fn upper(mut self, bound: Option<f64>) -> Self {
        self.upper = bound;
        self
    }

    pub fn lower(mut self, bound: Option<f64>) -> Self {
        self.lower = bound;
        self
    }
}

impl From<f64> for Sample {
    fn from(y: f64) -> Self {
        Sample::new(y)
    }
}

/// Time series plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XYPlot {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub x_axis: Axis,
    pub y_axes: Vec<YAxis>,
}

impl XYPlot {
    /// Plot over simulation time in seconds.
    pub fn over_time(title: impl Into<String>) -> Self {
        Self::new(title, "t", "s")
    }

    pub fn new(title: impl Into<String>, x_label: impl Into<String>, x_unit: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            x_axis: Axis::new(x_label, x_unit),
            y_axes: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_y(mut self, axis: YAxis) -> Self {
        self.y_axes.push(axis);
        self
    }

    /// Number of samples on the x axis.
    #[inline]
    pub fn len(&self) -> usize {
        self.x_axis.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x_axis.data.is_empty()
    }

    pub fn y_labels(&self) -> Vec<&str> {
        self.y_axes.iter().map(|y| y.axis.name.as_str()).collect()
    }

    pub fn y_series(&self, index: usize) -> Option<&[f64]> {
        self.y_axes.get(index).map(|y| y.axis.data.as_slice())
    }

    /// Append one x sample and one sample per y axis.
    pub fn push(&mut self, x: f64, samples: &[Sample]) -> Result<(), ReportError> {
        if samples.len() != self.y_axes.len() {
            return Err(ReportError::AxisMismatch {
                plot: self.title.clone(),
                expected: self.y_axes.len(),
                got: samples.len(),
            });
        }
        self.x_axis.data.push(x);
        for (y_axis, sample) in self.y_axes.iter_mut().zip(samples) {
            y_axis.axis.data.push(sample.y);
            if let Some(upper) = y_axis.upper.as_mut() {
                upper.push(sample.upper);
            }
            if let Some(lower) = y_axis.lower.as_mut() {
                lower.push(sample.lower);
            }
        }
        Ok(())
    }

    /// Append a gap: `x`, NaN on every y series and no per-sample bounds.
    pub fn push_gap(&mut self, x: f64) {
        self.x_axis.data.push(x);
        for y_axis in &mut self.y_axes {
            y_axis.axis.data.push(f64::NAN);
            if let Some(upper) = y_axis.upper.as_mut() {
                upper.push(None);
            }
            if let Some(lower) = y_axis.lower.as_mut() {
                lower.push(None);
            }
        }
    }

    /// Number of gap samples on the first y series.
    pub fn gap_count(&self) -> usize {
        self.y_axes
            .first()
            .map(|y| y.axis.data.iter().filter(|v| v.is_nan()).count())
            .unwrap_or(0)
    }

    /// Append plain y values with no per-sample bounds.
    pub fn push_values(&mut self, x: f64, ys: &[f64]) -> Result<(), ReportError> {
        let samples: Vec<Sample> = ys.iter().copied().map(Sample::new).collect();
        self.push(x, &samples)
    }

    /// Every y series and per-sample overlay has the x length.
    pub fn validate(&self) -> Result<(), ReportError> {
        let x_len = self.len();
        for y_axis in &self.y_axes {
            let overlay_lens = [
                y_axis.upper.as_ref().and_then(ThresholdOverlay::sample_len),
                y_axis.lower.as_ref().and_then(ThresholdOverlay::sample_len),
            ];
            let lens = std::iter::once(y_axis.axis.data.len()).chain(overlay_lens.into_iter().flatten());
            for y_len in lens {
                if y_len != x_len {
                    return Err(ReportError::Misaligned {
                        plot: self.title.clone(),
                        axis: y_axis.axis.name.clone(),
                        x_len,
                        y_len,
                    });
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// PAIRS AND SHEETS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairData {
    pub key: String,
    pub value: String,
}

impl PairData {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetColumn {
    pub header: String,
    pub data: Vec<String>,
}

/// Table of equal-length string columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetTable {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<SheetColumn>,
}

impl SheetTable {
    pub fn new(title: impl Into<String>, headers: &[&str]) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            columns: headers
                .iter()
                .map(|h| SheetColumn {
                    header: h.to_string(),
                    data: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn push_row<S: AsRef<str>>(&mut self, row: &[S]) -> Result<(), ReportError> {
        if row.len() != self.columns.len() {
            return Err(ReportError::RowWidth {
                sheet: self.title.clone(),
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        for (column, cell) in self.columns.iter_mut().zip(row) {
            column.data.push(cell.as_ref().to_string());
        }
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn column(&self, header: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|c| c.header == header)
            .map(|c| c.data.as_slice())
    }

    /// Append the rows of `other`, matching columns by header. Cells of
    /// headers `other` lacks are left empty.
    pub fn append(&mut self, other: &SheetTable) {
        let rows = other.row_count();
        for column in &mut self.columns {
            match other.columns.iter().find(|c| c.header == column.header) {
                Some(src) => column.data.extend(src.data.iter().take(rows).cloned()),
                None => column.data.extend(std::iter::repeat(String::new()).take(rows)),
            }
        }
    }
}

/// Any artifact a KPI attaches to its case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    XyPlot(XYPlot),
    Pair(PairData),
    Sheet(SheetTable),
}

impl Attachment {
    pub fn kind(&self) -> &'static str {
        match self {
            Attachment::XyPlot(_) => "xy_plot",
            Attachment::Pair(_) => "pair",
            Attachment::Sheet(_) => "sheet",
        }
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Summary statistics over one finalized series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    /// Population variance; 0 for an empty series.
    pub variance: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesStats {
    /// Gap samples (NaN) are left out.
    pub fn from_slice(data: &[f64]) -> Self {
        let data: Vec<f64> = data.iter().copied().filter(|v| !v.is_nan()).collect();
        if data.is_empty() {
            return Self::default();
        }
        Self {
            count: data.len(),
            mean: data.iter().mean(),
            variance: data.iter().population_variance(),
            min: Statistics::min(data.iter()),
            max: Statistics::max(data.iter()),
        }
    }
}

// =============================================================================
// REPORT BUILDER
// =============================================================================

/// Handle to a plot inside a [`ReportBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotId(usize);

/// Handle to a sheet inside a [`ReportBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetId(usize);

/// Artifacts owned by one evaluator. When reporting is disabled every write
/// is accepted and dropped.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    enabled: bool,
    attachments: Vec<Attachment>,
}

impl ReportBuilder {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            attachments: Vec::new(),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn add_plot(&mut self, plot: XYPlot) -> PlotId {
        self.attachments.push(Attachment::XyPlot(plot));
        PlotId(self.attachments.len() - 1)
    }

    pub fn add_sheet(&mut self, sheet: SheetTable) -> SheetId {
        self.attachments.push(Attachment::Sheet(sheet));
        SheetId(self.attachments.len() - 1)
    }

    pub fn add_pair(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if self.enabled {
            self.attachments.push(Attachment::Pair(PairData::new(key, value)));
        }
    }

    pub fn plot(&self, id: PlotId) -> Option<&XYPlot> {
        match self.attachments.get(id.0) {
            Some(Attachment::XyPlot(plot)) => Some(plot),
            _ => None,
        }
    }

    fn plot_mut(&mut self, id: PlotId) -> Result<&mut XYPlot, ReportError> {
        match self.attachments.get_mut(id.0) {
            Some(Attachment::XyPlot(plot)) => Ok(plot),
            _ => Err(ReportError::UnknownHandle(id.0)),
        }
    }

    pub fn push(&mut self, id: PlotId, x: f64, samples: &[Sample]) -> Result<(), ReportError> {
        if !self.enabled {
            return Ok(());
        }
        self.plot_mut(id)?.push(x, samples)
    }

    pub fn push_values(&mut self, id: PlotId, x: f64, ys: &[f64]) -> Result<(), ReportError> {
        if !self.enabled {
            return Ok(());
        }
        self.plot_mut(id)?.push_values(x, ys)
    }

    /// Append a gap sample to every plot.
    pub fn push_gap(&mut self, x: f64) {
        if !self.enabled {
            return;
        }
        for attachment in &mut self.attachments {
            if let Attachment::XyPlot(plot) = attachment {
                plot.push_gap(x);
            }
        }
    }

    pub fn push_row<S: AsRef<str>>(&mut self, id: SheetId, row: &[S]) -> Result<(), ReportError> {
        if !self.enabled {
            return Ok(());
        }
        match self.attachments.get_mut(id.0) {
            Some(Attachment::Sheet(sheet)) => sheet.push_row(row),
            _ => Err(ReportError::UnknownHandle(id.0)),
        }
    }

    /// Statistics over y series `axis` of a plot. `None` when reporting is
    /// disabled or the handle is wrong.
    pub fn series_stats(&self, id: PlotId, axis: usize) -> Option<SeriesStats> {
        if !self.enabled {
            return None;
        }
        self.plot(id)
            .and_then(|p| p.y_series(axis))
            .map(SeriesStats::from_slice)
    }

    /// Validate alignment and hand the artifacts over.
    pub fn finalize(self) -> Result<Vec<Attachment>, ReportError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        for attachment in &self.attachments {
            if let Attachment::XyPlot(plot) = attachment {
                plot.validate()?;
            }
        }
        Ok(self.attachments)
    }
}

// =============================================================================
// CASES
// =============================================================================

/// Descriptive header of a KPI case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseInfo {
    pub name: String,
    pub description: String,
    pub category: String,
    pub labels: Vec<String>,
    pub threshold_info: String,
    pub pass_condition: String,
    pub finish_condition: f64,
}

impl CaseInfo {
    pub fn from_definition(def: &KpiDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.info.description.clone(),
            category: def.info.category.clone(),
            labels: def.info.labels.clone(),
            threshold_info: def.threshold_info(),
            pass_condition: def.pass_condition_desc(),
            finish_condition: def.finish_condition,
        }
    }
}

/// Everything one KPI contributes to the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiCase {
    pub info: CaseInfo,
    #[serde(default)]
    pub result: Option<KpiResult>,
    /// Last early-stop vote cast by the KPI.
    #[serde(default)]
    pub request_stop: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl KpiCase {
    pub fn plots(&self) -> impl Iterator<Item = &XYPlot> {
        self.attachments.iter().filter_map(|a| match a {
            Attachment::XyPlot(p) => Some(p),
            _ => None,
        })
    }

    pub fn pair(&self, key: &str) -> Option<&str> {
        self.attachments.iter().find_map(|a| match a {
            Attachment::Pair(p) if p.key == key => Some(p.value.as_str()),
            _ => None,
        })
    }
}

// =============================================================================
// SCENARIO REPORT
// =============================================================================

/// Run metadata recorded alongside the cases.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMeta {
    pub scene_name: String,
    pub started_at: DateTime<Utc>,
    pub ticks: u64,
    pub sim_duration_s: f64,
    pub stop_reason: Option<String>,
}

/// File name prefix of a saved passing report.
pub const PASS_PREFIX: &str = "P.";
/// File name prefix of a saved failing report.
pub const FAIL_PREFIX: &str = "F.";
/// File name prefix of a saved report without a verdict.
pub const UNDEFINED_PREFIX: &str = "U.";

pub const KPI_TABLE_HEADERS: [&str; 6] = [
    "kpi",
    "category",
    "result",
    "detected",
    "pass condition",
    "thresholds",
];

/// Final report of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub id: Uuid,
    pub scene_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ticks: u64,
    pub sim_duration_s: f64,
    /// Set when a KPI ended the scenario early.
    pub stop_reason: Option<String>,
    pub passed: bool,
    pub reason: String,
    pub summary: CaseSummary,
    pub kpi_table: SheetTable,
    pub cases: Vec<KpiCase>,
}

impl ScenarioReport {
    /// Attach results to the cases collected by the sink and build the summary table.
    pub fn assemble(meta: RunMeta, mut cases: Vec<KpiCase>, verdict: &ScenarioVerdict) -> Self {
        for result in &verdict.results {
            match cases.iter_mut().find(|c| c.info.name == result.name) {
                Some(case) => case.result = Some(result.clone()),
                None => cases.push(KpiCase {
                    info: CaseInfo {
                        name: result.name.clone(),
                        ..CaseInfo::default()
                    },
                    result: Some(result.clone()),
                    ..KpiCase::default()
                }),
            }
        }

        let mut kpi_table = SheetTable::new("kpi table", &KPI_TABLE_HEADERS);
        for case in &cases {
            let (verdict_str, detected) = match &case.result {
                Some(r) => (r.verdict.to_string(), r.detected_count.to_string()),
                None => ("UNDEFINED".to_string(), "0".to_string()),
            };
            let row = [
                case.info.name.as_str(),
                case.info.category.as_str(),
                verdict_str.as_str(),
                detected.as_str(),
                case.info.pass_condition.as_str(),
                case.info.threshold_info.as_str(),
            ];
            if let Err(e) = kpi_table.push_row(&row) {
                tracing::error!(error = %e, "kpi table row rejected");
            }
        }

        Self {
            id: Uuid::new_v4(),
            scene_name: meta.scene_name,
            started_at: meta.started_at,
            finished_at: Utc::now(),
            ticks: meta.ticks,
            sim_duration_s: meta.sim_duration_s,
            stop_reason: meta.stop_reason,
            passed: verdict.passed,
            reason: verdict.reason.clone(),
            summary: verdict.summary,
            kpi_table,
            cases,
        }
    }

    pub fn case(&self, name: &str) -> Option<&KpiCase> {
        self.cases.iter().find(|c| c.info.name == name)
    }

    pub fn to_json_pretty(&self) -> Result<String, ReportError> {
        serde_json::to_string_pretty(self).map_err(|e| ReportError::Serialize(e.to_string()))
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading report {}", path.display()))?;
        let report = serde_json::from_str(&contents)
            .with_context(|| format!("parsing report {}", path.display()))?;
        Ok(report)
    }

    /// Fold a later run into this one.
    ///
    /// The merged report fails if either run failed. Counts, ticks and sim
    /// time are summed, cases and table rows appended, reasons joined with
    /// ';'. The id and start time of `self` are kept.
    pub fn merge(mut self, current: ScenarioReport) -> Self {
        fn join(a: &str, b: &str) -> String {
            match (a.is_empty(), b.is_empty()) {
                (true, _) => b.to_string(),
                (_, true) => a.to_string(),
                _ => format!("{};{}", a, b),
            }
        }

        self.passed = self.passed && current.passed;
        self.reason = join(&self.reason, &current.reason);
        self.stop_reason = match (self.stop_reason.take(), current.stop_reason) {
            (Some(a), Some(b)) => Some(join(&a, &b)),
            (a, b) => a.or(b),
        };
        self.finished_at = self.finished_at.max(current.finished_at);
        self.ticks += current.ticks;
        self.sim_duration_s += current.sim_duration_s;
        self.summary.merge(&current.summary);
        self.kpi_table.append(&current.kpi_table);
        self.cases.extend(current.cases);
        self
    }

    pub fn file_prefix(&self) -> &'static str {
        if self.passed {
            PASS_PREFIX
        } else {
            FAIL_PREFIX
        }
    }

    /// Path of a report saved in `dir` under `file_name`, whatever its verdict prefix.
    pub fn find_saved(dir: impl AsRef<Path>, file_name: &str) -> Option<PathBuf> {
        [PASS_PREFIX, FAIL_PREFIX, UNDEFINED_PREFIX]
            .iter()
            .map(|prefix| dir.as_ref().join(format!("{}{}", prefix, file_name)))
            .find(|path| path.is_file())
    }

    /// Merge into the report already saved under `file_name` in `dir`, if any,
    /// and write the result as `<prefix><file_name>`, replacing the old file.
    pub fn save_merged(self, dir: impl AsRef<Path>, file_name: &str) -> anyhow::Result<(PathBuf, Self)> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let previous = Self::find_saved(dir, file_name);
        let merged = match &previous {
            Some(path) => {
                tracing::info!(path = %path.display(), "merging into previous report");
                Self::load(path)?.merge(self)
            }
            None => self,
        };
        let target = dir.join(format!("{}{}", merged.file_prefix(), file_name));
        merged.write_json(&target)?;
        if let Some(old) = previous.filter(|p| *p != target) {
            std::fs::remove_file(&old)
                .with_context(|| format!("removing stale report {}", old.display()))?;
        }
        Ok((target, merged))
    }
}
