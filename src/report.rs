//! Failure accounting shared by every stage.

use serde::Serialize;
use std::fmt;

/// Pipeline stage a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Types,
    Subtypes,
    ProcedureClasses,
    AxisTables,
    Details,
    Diagnoses,
    Chemicals,
    Index,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Types => "types",
            Stage::Subtypes => "subtypes",
            Stage::ProcedureClasses => "procedure_classes",
            Stage::AxisTables => "axis_tables",
            Stage::Details => "details",
            Stage::Diagnoses => "diagnoses",
            Stage::Chemicals => "chemicals",
            Stage::Index => "index",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key dropped by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub stage: Stage,
    pub key: String,
    pub reason: String,
}

/// Every key dropped during a run, in the order they were dropped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    failures: Vec<FetchFailure>,
}

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, key: impl Into<String>, reason: impl fmt::Display) {
        let key = key.into();
        let reason = reason.to_string();
        tracing::warn!(stage = %stage, key = %key, "Dropped: {}", reason);
        self.failures.push(FetchFailure { stage, key, reason });
    }

    pub fn extend(&mut self, other: FailureReport) {
        self.failures.extend(other.failures);
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.failures.iter().filter(|f| f.stage == stage).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FetchFailure> {
        self.failures.iter()
    }

    /// Per-stage counts, sorted by stage
    pub fn by_stage(&self) -> Vec<(Stage, usize)> {
        let mut counts: std::collections::BTreeMap<Stage, usize> = Default::default();
        for failure in &self.failures {
            *counts.entry(failure.stage).or_default() += 1;
        }
        counts.into_iter().collect()
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no failures");
        }
        let parts: Vec<String> = self
            .by_stage()
            .into_iter()
            .map(|(stage, n)| format!("{}={}", stage, n))
            .collect();
        write!(f, "{} failures ({})", self.len(), parts.join(", "))
    }
}

/// The value a stage produced plus the keys it had to drop
#[derive(Debug, Clone, Default)]
pub struct StageOutput<T> {
    pub value: T,
    pub failures: FailureReport,
}

impl<T> StageOutput<T> {
    pub fn new(value: T, failures: FailureReport) -> Self {
        Self { value, failures }
    }

    /// Move the failures into a run-wide report and keep the value
    pub fn into_value(self, report: &mut FailureReport) -> T {
        report.extend(self.failures);
        self.value
    }
}
