use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::model::Measurement;

pub const CSV_HEADER: &str = "Dataset Size,Query Name,Result Count,Execution Time (ms),Total Resources,Total Bookings,Resources Collection Size (MB),Bookings Collection Size (MB),Documents Examined,Keys Examined";

const TITLE: &str = "RESOURCE AVAILABILITY PERFORMANCE REPORT";
const NA: &str = "N/A";

/// Both renderings of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Comma-separated, one row per measurement. Missing numbers are `0`.
    pub tabular: String,
    /// Labeled blocks for humans. Missing values are `N/A`.
    pub narrative: String,
}

/// `1234567` -> `1,234,567`.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn ms(m: &Measurement) -> String {
    format!("{:.3}", m.execution_ms)
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn count_or_zero(v: Option<u64>) -> String {
    v.unwrap_or(0).to_string()
}

fn mb_or_zero(v: Option<f64>) -> String {
    v.map_or_else(|| "0".to_string(), |x| x.to_string())
}

fn count_or_na(v: Option<u64>) -> String {
    v.map_or_else(|| NA.to_string(), thousands)
}

fn mb_or_na(v: Option<f64>) -> String {
    v.map_or_else(|| NA.to_string(), |x| format!("{x} MB"))
}

fn csv_row(m: &Measurement) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{}\n",
        m.dataset_size,
        quote(&m.query),
        m.result_count,
        ms(m),
        count_or_zero(m.total_resources),
        count_or_zero(m.total_bookings),
        mb_or_zero(m.resources_size_mb),
        mb_or_zero(m.bookings_size_mb),
        count_or_zero(m.plan.documents_examined),
        count_or_zero(m.plan.keys_examined),
    )
}

fn narrative_block(m: &Measurement) -> String {
    format!(
        "Dataset Size: {} resources\n\
         Query: {}\n\
         Result Count: {}\n\
         Execution Time: {}ms\n\
         Total Resources: {}\n\
         Total Bookings: {}\n\
         Resources Collection Size: {}\n\
         Bookings Collection Size: {}\n\
         Documents Examined: {}\n\
         Keys Examined: {}\n\
         {}\n\n",
        thousands(m.dataset_size as u64),
        m.query,
        m.result_count,
        ms(m),
        count_or_na(m.total_resources),
        count_or_na(m.total_bookings),
        mb_or_na(m.resources_size_mb),
        mb_or_na(m.bookings_size_mb),
        count_or_na(m.plan.documents_examined),
        count_or_na(m.plan.keys_examined),
        "-".repeat(50),
    )
}

pub fn aggregate(measurements: &[Measurement]) -> Report {
    let mut tabular = String::new();
    let mut narrative = String::new();

    tabular.push_str(CSV_HEADER);
    tabular.push('\n');
    narrative.push_str(TITLE);
    narrative.push('\n');
    narrative.push_str(&"=".repeat(50));
    narrative.push_str("\n\n");

    for m in measurements {
        tabular.push_str(&csv_row(m));
        narrative.push_str(&narrative_block(m));
    }

    Report { tabular, narrative }
}

/// File-name-safe RFC 3339 stamp, e.g. `2025-08-14T09-30-00-123Z`.
pub fn run_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

impl Report {
    /// Write `performance_report_<timestamp>.csv` and `.txt` under `dir`,
    /// creating it if needed. Returns both paths.
    pub fn write(&self, dir: &Path, timestamp: &str) -> io::Result<(PathBuf, PathBuf)> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            info!("created reports directory {}", dir.display());
        }
        let csv = dir.join(format!("performance_report_{timestamp}.csv"));
        let txt = dir.join(format!("performance_report_{timestamp}.txt"));
        fs::write(&csv, &self.tabular)?;
        fs::write(&txt, &self.narrative)?;
        Ok((csv, txt))
    }
}

/// Console summary, one block per measurement.
pub fn log_summary(measurements: &[Measurement]) {
    info!("{}", "=".repeat(80));
    info!("PERFORMANCE TEST REPORT");
    info!("{}", "=".repeat(80));
    for m in measurements {
        info!("dataset: {} resources", thousands(m.dataset_size as u64));
        info!("  query: {}", m.query);
        info!("  results: {}", thousands(m.result_count as u64));
        info!("  time: {}ms", ms(m));
        info!(
            "  totals: {} resources ({}), {} bookings ({})",
            count_or_na(m.total_resources),
            mb_or_na(m.resources_size_mb),
            count_or_na(m.total_bookings),
            mb_or_na(m.bookings_size_mb),
        );
        info!(
            "  examined: {} documents, {} index keys",
            count_or_na(m.plan.documents_examined),
            count_or_na(m.plan.keys_examined),
        );
    }
}
