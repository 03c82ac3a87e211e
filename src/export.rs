use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use tracing::info;

use crate::api::Dataset;
use crate::models::{fields, Cell, MetricRecord};

pub const EMPTY_NOTICE: &str = "No data to export.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written { path: PathBuf, rows: usize },
    /// Nothing was written; show [`EMPTY_NOTICE`] instead.
    Empty,
}

#[derive(Clone, Copy)]
pub enum Accessor {
    Field(&'static str),
    Computed(fn(&MetricRecord) -> Cell),
}

/// One exported column: header label plus how to read the cell.
#[derive(Clone, Copy)]
pub struct ExportColumn {
    pub label: &'static str,
    pub accessor: Accessor,
}

impl ExportColumn {
    const fn field(label: &'static str, field: &'static str) -> Self {
        Self {
            label,
            accessor: Accessor::Field(field),
        }
    }

    pub fn cell(&self, record: &MetricRecord) -> Cell {
        match self.accessor {
            Accessor::Field(field) => record.cell(field),
            Accessor::Computed(read) => read(record),
        }
    }
}

fn sales_per_program(record: &MetricRecord) -> Cell {
    let programs = record.number(fields::PROGRAMS);
    if programs > 0.0 {
        Cell::Number((record.number(fields::SALES) / programs * 100.0).round() / 100.0)
    } else {
        Cell::Number(0.0)
    }
}

/// Column set per dataset. Derived labels require annotated records.
pub fn columns_for(dataset: Dataset) -> Vec<ExportColumn> {
    use ExportColumn as C;
    match dataset {
        Dataset::Accounts => vec![
            C::field("Email", "email"),
            C::field("Advocates", "user_names"),
            C::field("Instagram", "instagram_handles"),
            C::field("TikTok", "tiktok_handles"),
            C::field("Engagement", fields::ENGAGEMENT),
            C::field("Sales", fields::SALES),
            C::field("Programs", fields::PROGRAMS),
            C::field("Tasks", fields::TASKS),
            C::field("Conversion Rate %", fields::CONVERSION_RATE_PCT),
            ExportColumn {
                label: "Sales per Program",
                accessor: Accessor::Computed(sales_per_program),
            },
            C::field("Tier", "tier"),
            C::field("Champion Score", "champion_score"),
        ],
        Dataset::ActivitySegments => vec![
            C::field("Email", "email"),
            C::field("Advocates", "user_names"),
            C::field("Programs", fields::PROGRAMS),
            C::field("Tasks", fields::TASKS),
            C::field("Engagement", fields::ENGAGEMENT),
            C::field("Sales", fields::SALES),
            C::field("Activity Segment", "activity_segment"),
            C::field("Value Segment", "value_segment"),
        ],
        Dataset::Champions => vec![
            C::field("Email", "email"),
            C::field("Advocates", "user_names"),
            C::field("Engagement", fields::ENGAGEMENT),
            C::field("Sales", fields::SALES),
            C::field("Conversion Rate %", fields::CONVERSION_RATE_PCT),
            C::field("Champion Score", "champion_score"),
            C::field("Balance Score", "balance_score"),
            C::field("Opportunity", "opportunity_flag"),
        ],
        Dataset::SalesChampions => vec![
            C::field("Email", "email"),
            C::field("Advocates", "user_names"),
            C::field("Sales", fields::SALES),
            C::field("Programs", fields::PROGRAMS),
            C::field("Sales per Program", "sales_per_program"),
            C::field("Sales per Engagement Point", "sales_per_engagement_point"),
            C::field("Tier", "tier"),
        ],
        Dataset::EngagementChampions => vec![
            C::field("Email", "email"),
            C::field("Advocates", "user_names"),
            C::field("Engagement", fields::ENGAGEMENT),
            C::field("Sales", fields::SALES),
            C::field("Engagement per Task", "avg_engagement_per_task"),
            C::field("Opportunity", "opportunity_flag"),
        ],
        Dataset::BalancedChampions => vec![
            C::field("Email", "email"),
            C::field("Advocates", "user_names"),
            C::field("Engagement", fields::ENGAGEMENT),
            C::field("Sales", fields::SALES),
            C::field("Balance Score", "balance_score"),
            C::field("Champion Score", "champion_score"),
        ],
        Dataset::SalesOutliers => vec![
            C::field("Advocate", "advocate_user_name"),
            C::field("Email", "account_email"),
            C::field("Brand", "brand"),
            C::field("Amount", "amount"),
            C::field("Average Sale", "avg_sale"),
            C::field("Z-Score", fields::Z_SCORE),
            C::field("Outlier Type", "outlier_type"),
            C::field("Attributed At", "attributed_at"),
        ],
        Dataset::EngagementOutliers => vec![
            C::field("Advocate", "advocate_user_name"),
            C::field("Email", "account_email"),
            C::field("Platform", "platform"),
            C::field("Brand", "brand"),
            C::field("Engagement", "engagement_score"),
            C::field("Average Engagement", "avg_engagement"),
            C::field("Z-Score", fields::Z_SCORE),
            C::field("Category", "engagement_category"),
        ],
        Dataset::EfficientConverters => vec![
            C::field("Email", "email"),
            C::field("Advocates", "user_names"),
            C::field("Engagement", fields::ENGAGEMENT),
            C::field("Sales", fields::SALES),
            C::field("Efficiency", "efficiency_ratio"),
            C::field("Converter Segment", "converter_segment"),
        ],
        Dataset::Brands => vec![
            C::field("Brand", "brand"),
            C::field("Programs", fields::PROGRAMS),
            C::field("Accounts", "total_accounts"),
            C::field("Advocates", "total_advocates"),
            C::field("Tasks", fields::TASKS),
            C::field("Engagement", fields::ENGAGEMENT),
            C::field("Avg Engagement Rate", "avg_engagement_rate"),
            C::field("Programs with Sales", "programs_with_sales"),
            C::field("Sales", fields::SALES),
            C::field("Sales per Account", "sales_per_account"),
            C::field("Sales per Advocate", "sales_per_advocate"),
        ],
    }
}

/// Header labels and cell rows for `records` under `columns`.
pub fn table(records: &[&MetricRecord], columns: &[ExportColumn]) -> (Vec<String>, Vec<Vec<Cell>>) {
    let headers = columns.iter().map(|c| c.label.to_string()).collect();
    let rows = records
        .iter()
        .map(|record| columns.iter().map(|c| c.cell(record)).collect())
        .collect();
    (headers, rows)
}

/// CSV text: one header line plus one line per row. Cells containing a
/// comma, a double quote or a line break are quoted with inner quotes doubled.
pub fn render_csv(headers: &[String], rows: &[Vec<Cell>]) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .flexible(true)
        .from_writer(Vec::new());

    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush CSV: {}", err.error()))?;
    Ok(String::from_utf8(bytes)?)
}

/// `<dataset>_<YYYY-MM-DD>.csv`
pub fn export_filename(stem: &str, date: NaiveDate) -> String {
    format!("{stem}_{}.csv", date.format("%Y-%m-%d"))
}

/// Writes `rows` to `path` as UTF-8 CSV. Empty input writes nothing and
/// returns [`ExportOutcome::Empty`].
pub fn export_to_csv(headers: &[String], rows: &[Vec<Cell>], path: &Path) -> anyhow::Result<ExportOutcome> {
    if rows.is_empty() {
        return Ok(ExportOutcome::Empty);
    }

    let payload = render_csv(headers, rows)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create export directory {}", parent.display()))?;
    }
    fs::write(path, payload).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), rows = rows.len(), "csv exported");

    Ok(ExportOutcome::Written {
        path: path.to_path_buf(),
        rows: rows.len(),
    })
}

/// Exports the filtered, sorted view of `dataset` into `dir`.
pub fn export_dataset(
    dataset: Dataset,
    records: &[&MetricRecord],
    dir: &Path,
    date: NaiveDate,
) -> anyhow::Result<ExportOutcome> {
    let (headers, rows) = table(records, &columns_for(dataset));
    let path = dir.join(export_filename(dataset.slug(), date));
    export_to_csv(&headers, &rows, &path)
}
