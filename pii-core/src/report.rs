//! # CSV Reports
//!
//! A validation run writes one CSV per method and one combined CSV across
//! methods:
//!
//! ```text
//! <dataset>_<method>_metrics.csv   entity_type,precision,recall,f1,tp,fp,fn,total_true,total_pred,class_proportion
//! <dataset>_combined_metrics.csv   method,entity_type,precision,...
//! ```
//!
//! The combined file is append-only across runs: [`CombinedReport::load`]
//! reads what previous runs wrote and [`CombinedReport::add`] skips
//! `(method, entity_type)` pairs already present.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::metrics::{MetricsReport, TypeMetrics};

/// One line of a per-method report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub entity_type: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub total_true: usize,
    pub total_pred: usize,
    pub class_proportion: f64,
}

impl ReportRow {
    fn new(label: &str, m: &TypeMetrics) -> Self {
        Self {
            entity_type: label.to_string(),
            precision: m.precision,
            recall: m.recall,
            f1: m.f1,
            tp: m.tp,
            fp: m.fp,
            fn_: m.fn_,
            total_true: m.total_true,
            total_pred: m.total_pred,
            class_proportion: m.class_proportion,
        }
    }
}

/// One line of the combined report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRow {
    pub method: String,
    pub entity_type: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub total_true: usize,
    pub total_pred: usize,
    pub class_proportion: f64,
}

impl CombinedRow {
    fn new(method: &str, row: ReportRow) -> Self {
        Self {
            method: method.to_string(),
            entity_type: row.entity_type,
            precision: row.precision,
            recall: row.recall,
            f1: row.f1,
            tp: row.tp,
            fp: row.fp,
            fn_: row.fn_,
            total_true: row.total_true,
            total_pred: row.total_pred,
            class_proportion: row.class_proportion,
        }
    }
}

/// Report rows in output order.
pub fn report_rows(report: &MetricsReport) -> Vec<ReportRow> {
    report.rows().into_iter().map(|(label, m)| ReportRow::new(label, m)).collect()
}

/// Writes `report` as CSV.
pub fn write_report<W: io::Write>(writer: W, report: &MetricsReport) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in report_rows(report) {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_report_file(path: impl AsRef<Path>, report: &MetricsReport) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_report(file, report)
}

/// Method names with spaces or slashes made file-name safe.
pub fn safe_method_name(method: &str) -> String {
    method.replace([' ', '/'], "_")
}

pub fn metrics_file_name(dataset: &str, method: &str) -> String {
    format!("{dataset}_{}_metrics.csv", safe_method_name(method))
}

pub fn combined_file_name(dataset: &str) -> String {
    format!("{dataset}_combined_metrics.csv")
}

/// Metrics of several methods side by side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedReport {
    rows: Vec<CombinedRow>,
}

impl CombinedReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader.deserialize().collect::<std::result::Result<Vec<CombinedRow>, _>>()?;
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[CombinedRow] {
        &self.rows
    }

    pub fn contains_method(&self, method: &str) -> bool {
        self.rows.iter().any(|r| r.method == method)
    }

    /// Appends the rows of `report` under `method`; returns how many were added.
    pub fn add(&mut self, method: &str, report: &MetricsReport) -> usize {
        let existing: HashSet<(String, String)> = self
            .rows
            .iter()
            .map(|r| (r.method.clone(), r.entity_type.clone()))
            .collect();

        let mut added = 0;
        for row in report_rows(report) {
            if existing.contains(&(method.to_string(), row.entity_type.clone())) {
                warn!(method, entity_type = %row.entity_type, "row already in combined report, skipping");
                continue;
            }
            self.rows.push(CombinedRow::new(method, row));
            added += 1;
        }
        added
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut csv = csv::Writer::from_path(path)?;
        for row in &self.rows {
            csv.serialize(row)?;
        }
        csv.flush()?;
        Ok(())
    }
}
