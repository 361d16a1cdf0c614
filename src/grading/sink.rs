//! Report sinks
//!
//! Where evaluators hand their finished case at Stop.

use crate::grading::error::ReportError;
use crate::grading::report::KpiCase;

/// Receives one finished case per evaluator.
pub trait ReportSink {
    fn attach(&mut self, case: KpiCase) -> Result<(), ReportError>;
}

/// Collects cases in attach order.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    cases: Vec<KpiCase>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cases(&self) -> &[KpiCase] {
        &self.cases
    }

    pub fn case(&self, name: &str) -> Option<&KpiCase> {
        self.cases.iter().find(|c| c.info.name == name)
    }

    pub fn into_cases(self) -> Vec<KpiCase> {
        self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl ReportSink for MemorySink {
    fn attach(&mut self, case: KpiCase) -> Result<(), ReportError> {
        self.cases.push(case);
        Ok(())
    }
}

/// Discards everything. Used when reporting is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn attach(&mut self, _case: KpiCase) -> Result<(), ReportError> {
        Ok(())
    }
}
