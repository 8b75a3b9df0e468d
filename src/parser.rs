//! Bandwidth-table extraction from accumulated benchmark output.
//!
//! The benchmark prints a bounded table: a `#`-prefixed header row naming
//! the columns, data rows of at least twelve whitespace-separated fields,
//! and a footer (bounds notice or average-bandwidth summary). Everything
//! outside that span -- launcher chatter, NCCL INFO lines, comments -- is
//! skipped. The parse is pure and re-run from scratch on every output
//! update; no state is carried between calls.

use serde::Serialize;

/// Substring identifying the column-header line (together with a `count`
/// column token). The header itself is not a data row.
const TABLE_HEADER_LABEL: &str = "#       size";
const TABLE_HEADER_COUNT: &str = "count";

/// Either footer ends the table for good; parsing never resumes.
const FOOTER_OUT_OF_BOUNDS: &str = "# Out of bounds";
const FOOTER_AVG_BANDWIDTH: &str = "# Avg bus bandwidth";

/// Minimum fields for a row: size, count, type, redop, root, then two
/// (time, algbw, busbw, #wrong) groups for out-of-place and in-place.
const MIN_ROW_FIELDS: usize = 12;

/// One parsed measurement row. Derived only from output text, never
/// constructed directly by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandwidthRecord {
    /// Message size in bytes; always positive.
    pub size: u64,
    pub count: i64,
    /// Element type column, as printed (e.g. `float`, `bfloat16`).
    #[serde(rename = "type")]
    pub type_label: String,
    pub out_alg_bw: f64,
    pub out_bus_bw: f64,
    pub in_alg_bw: f64,
    pub in_bus_bw: f64,
}

/// Extract every measurement row from `output`, in input order.
///
/// Rows whose size column is not a positive integer are dropped; a
/// bandwidth column that fails to parse is recorded as zero rather than
/// discarding the row. Malformed input never errors -- it just yields
/// fewer records.
pub fn parse_bandwidth_table(output: &str) -> Vec<BandwidthRecord> {
    let mut records = Vec::new();
    let mut active = false;

    for line in output.lines() {
        if !active {
            if line.contains(TABLE_HEADER_LABEL) && line.contains(TABLE_HEADER_COUNT) {
                active = true;
            }
            continue;
        }

        if line.contains(FOOTER_OUT_OF_BOUNDS) || line.contains(FOOTER_AVG_BANDWIDTH) {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(record) = parse_row(trimmed) {
            records.push(record);
        }
    }

    records
}

fn parse_row(line: &str) -> Option<BandwidthRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_ROW_FIELDS {
        return None;
    }

    let size: u64 = fields[0].parse().ok().filter(|s| *s > 0)?;

    Some(BandwidthRecord {
        size,
        count: fields[1].parse().unwrap_or(0),
        type_label: fields[2].to_string(),
        out_alg_bw: fields[6].parse().unwrap_or(0.0),
        out_bus_bw: fields[7].parse().unwrap_or(0.0),
        in_alg_bw: fields[10].parse().unwrap_or(0.0),
        in_bus_bw: fields[11].parse().unwrap_or(0.0),
    })
}
