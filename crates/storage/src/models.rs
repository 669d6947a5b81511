use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Outcome of one processing attempt, stored as its literal code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionStatus {
    Success,
    Failed,
    SkippedDup,
    AlreadyDone,
}

impl ConversionStatus {
    pub const ALL: [ConversionStatus; 4] = [
        ConversionStatus::Success,
        ConversionStatus::Failed,
        ConversionStatus::SkippedDup,
        ConversionStatus::AlreadyDone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Success => "SUCCESS",
            ConversionStatus::Failed => "FAILED",
            ConversionStatus::SkippedDup => "SKIPPED_DUP",
            ConversionStatus::AlreadyDone => "ALREADY_DONE",
        }
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown conversion status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ConversionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConversionStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Insert payload for one ledger row. Savings columns are derived on write.
#[derive(Debug, Clone)]
pub struct NewConversion {
    pub converted_at: i64,
    pub status: ConversionStatus,
    pub src_name: String,
    pub src_ext: String,
    pub src_fullpath: String,
    pub dst_fullpath: Option<String>,
    pub src_hash: Option<String>,
    pub orig_width: Option<i64>,
    pub orig_height: Option<i64>,
    pub new_width: Option<i64>,
    pub new_height: Option<i64>,
    pub out_size_bytes: Option<i64>,
    pub duration_ms: i64,
    pub conversion_mode: String,
    pub conversion_args: String,
    pub error: Option<String>,
    pub src_size: Option<i64>,
    pub src_mtime: Option<i64>,
}

impl NewConversion {
    /// Percent and megabytes saved, only when both sizes are known and non-zero.
    pub fn savings(&self) -> (Option<i64>, Option<f64>) {
        match (self.src_size, self.out_size_bytes) {
            (Some(src), Some(out)) if src > 0 && out > 0 => {
                let diff = (src - out) as f64;
                let percent = (diff / src as f64 * 100.0).round() as i64;
                let mb = (diff / BYTES_PER_MB * 100.0).round() / 100.0;
                (Some(percent), Some(mb))
            }
            _ => (None, None),
        }
    }
}

/// Aggregates shown by the reporting surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub total_files: i64,
    pub total_saved_mb: f64,
    pub success_rate: f64,
    pub last_run: Option<i64>,
}

/// One history row, with dimensions backfilled from the authoritative SUCCESS
/// row of the same fingerprint when the attempt did not record its own.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub converted_at: i64,
    pub src_name: String,
    pub dst_fullpath: Option<String>,
    pub status: ConversionStatus,
    pub orig_width: Option<i64>,
    pub orig_height: Option<i64>,
    pub new_width: Option<i64>,
    pub new_height: Option<i64>,
    pub saved_mb: f64,
    pub duration_ms: Option<i64>,
}

impl HistoryEntry {
    pub fn original_size(&self) -> String {
        format_dims(self.orig_width, self.orig_height)
    }

    pub fn new_size(&self) -> String {
        format_dims(self.new_width, self.new_height)
    }
}

fn format_dims(w: Option<i64>, h: Option<i64>) -> String {
    match (w, h) {
        (Some(w), Some(h)) => format!("{w}x{h}"),
        _ => "?".to_string(),
    }
}

/// 1-based page selector for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

impl Page {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(src_size: Option<i64>, out: Option<i64>) -> NewConversion {
        NewConversion {
            converted_at: 0,
            status: ConversionStatus::Success,
            src_name: "a.jpg".into(),
            src_ext: ".jpg".into(),
            src_fullpath: "/a.jpg".into(),
            dst_fullpath: None,
            src_hash: None,
            orig_width: None,
            orig_height: None,
            new_width: None,
            new_height: None,
            out_size_bytes: out,
            duration_ms: 0,
            conversion_mode: "convert".into(),
            conversion_args: String::new(),
            error: None,
            src_size,
            src_mtime: None,
        }
    }

    #[test]
    fn status_codes_round_trip_through_text() {
        for st in ConversionStatus::ALL {
            assert_eq!(st.as_str().parse::<ConversionStatus>().unwrap(), st);
        }
        assert!("DONE".parse::<ConversionStatus>().is_err());
    }

    #[test]
    fn savings_need_both_sizes() {
        assert_eq!(record(None, Some(10)).savings(), (None, None));
        assert_eq!(record(Some(10), None).savings(), (None, None));
        assert_eq!(record(Some(0), Some(10)).savings(), (None, None));
    }

    #[test]
    fn savings_round_percent_and_megabytes() {
        let (pct, mb) = record(Some(10 * 1024 * 1024), Some(1024 * 1024)).savings();
        assert_eq!(pct, Some(90));
        assert_eq!(mb, Some(9.0));

        let (pct, mb) = record(Some(3_000_000), Some(1_000_000)).savings();
        assert_eq!(pct, Some(67));
        assert_eq!(mb, Some(1.91));
    }

    #[test]
    fn page_offset_is_one_based() {
        assert_eq!(Page::default().offset(), 0);
        assert_eq!(Page { page: 3, per_page: 20 }.offset(), 40);
        assert_eq!(Page { page: 0, per_page: 20 }.offset(), 0);
    }
}
