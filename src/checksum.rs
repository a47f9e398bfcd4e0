//! Checksum parity comparator
//!
//! Parses per-kernel checksum rows out of two emulator stdout logs and
//! reports, kernel by kernel, whether the candidate build computed the same
//! results as the baseline. String comparison only: checksums are opaque
//! tokens and are never interpreted numerically.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// One parsed `<kernel> <time> <checksum>` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRow {
    pub time: String,
    pub checksum: String,
}

/// One kernel present in both logs whose checksums disagree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumMismatch {
    pub kernel: String,
    pub baseline_checksum: String,
    pub candidate_checksum: String,
    pub baseline_time: String,
    pub candidate_time: String,
}

/// Full comparison outcome, serialized verbatim into the JSON report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecksumComparison {
    pub baseline: String,
    pub candidate: String,
    pub kernel_list: Option<String>,
    pub kernels_compared: usize,
    pub baseline_kernels_found: usize,
    pub candidate_kernels_found: usize,
    pub missing_in_baseline: Vec<String>,
    pub missing_in_candidate: Vec<String>,
    pub checksum_mismatch_count: usize,
    pub checksum_mismatches: Vec<ChecksumMismatch>,
    pub ok: bool,
}

/// Extract checksum rows from emulator stdout. Non-matching lines are
/// ignored, the `Loop` header row is skipped, and the first occurrence of a
/// kernel wins so a hung-then-restarted run cannot overwrite earlier rows.
#[must_use]
pub fn parse_log(text: &str) -> BTreeMap<String, ChecksumRow> {
    let row_re = Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s+(\S+)\s+(\S+)\s*$").unwrap();
    let mut rows = BTreeMap::new();
    for line in text.lines() {
        let Some(caps) = row_re.captures(line) else {
            continue;
        };
        let kernel = &caps[1];
        if kernel == "Loop" || rows.contains_key(kernel) {
            continue;
        }
        rows.insert(
            kernel.to_string(),
            ChecksumRow {
                time: caps[2].to_string(),
                checksum: caps[3].to_string(),
            },
        );
    }
    rows
}

/// Compare two parsed logs. With no kernel filter the union of kernels seen
/// in either log is compared in sorted order; with a filter, exactly the
/// listed kernels in list order. Kernels absent from one side are reported
/// missing, never counted as mismatches.
#[must_use]
pub fn compare_logs(
    baseline_text: &str,
    candidate_text: &str,
    kernel_filter: Option<&[String]>,
) -> ChecksumComparison {
    let baseline_rows = parse_log(baseline_text);
    let candidate_rows = parse_log(candidate_text);

    let kernels: Vec<String> = match kernel_filter {
        Some(list) => list.to_vec(),
        None => {
            // BTreeMap keys are already sorted; merging keeps the union sorted.
            let mut union: Vec<String> = baseline_rows.keys().cloned().collect();
            for kernel in candidate_rows.keys() {
                if !baseline_rows.contains_key(kernel) {
                    union.push(kernel.clone());
                }
            }
            union.sort();
            union
        }
    };

    let missing_in_baseline: Vec<String> = kernels
        .iter()
        .filter(|k| !baseline_rows.contains_key(*k))
        .cloned()
        .collect();
    let missing_in_candidate: Vec<String> = kernels
        .iter()
        .filter(|k| !candidate_rows.contains_key(*k))
        .cloned()
        .collect();

    let mut mismatches = Vec::new();
    for kernel in &kernels {
        let (Some(b), Some(c)) = (baseline_rows.get(kernel), candidate_rows.get(kernel)) else {
            continue;
        };
        if b.checksum != c.checksum {
            mismatches.push(ChecksumMismatch {
                kernel: kernel.clone(),
                baseline_checksum: b.checksum.clone(),
                candidate_checksum: c.checksum.clone(),
                baseline_time: b.time.clone(),
                candidate_time: c.time.clone(),
            });
        }
    }

    let ok =
        missing_in_baseline.is_empty() && missing_in_candidate.is_empty() && mismatches.is_empty();
    ChecksumComparison {
        baseline: String::new(),
        candidate: String::new(),
        kernel_list: None,
        kernels_compared: kernels.len(),
        baseline_kernels_found: baseline_rows.len(),
        candidate_kernels_found: candidate_rows.len(),
        missing_in_baseline,
        missing_in_candidate,
        checksum_mismatch_count: mismatches.len(),
        checksum_mismatches: mismatches,
        ok,
    }
}

/// Markdown rendering of a comparison, truncated to 128 entries per section
#[must_use]
pub fn comparison_markdown(comparison: &ChecksumComparison) -> String {
    let mut lines = vec![
        "# TSVC mode checksum comparison".to_string(),
        String::new(),
        format!("- Baseline: `{}`", comparison.baseline),
        format!("- Candidate: `{}`", comparison.candidate),
        format!("- Kernels compared: `{}`", comparison.kernels_compared),
        format!(
            "- Missing in baseline: `{}`",
            comparison.missing_in_baseline.len()
        ),
        format!(
            "- Missing in candidate: `{}`",
            comparison.missing_in_candidate.len()
        ),
        format!(
            "- Checksum mismatches: `{}`",
            comparison.checksum_mismatch_count
        ),
        format!(
            "- Status: `{}`",
            if comparison.ok { "PASS" } else { "FAIL" }
        ),
    ];
    if !comparison.missing_in_baseline.is_empty() {
        lines.push(String::new());
        lines.push("## Missing In Baseline".to_string());
        for kernel in comparison.missing_in_baseline.iter().take(128) {
            lines.push(format!("- `{kernel}`"));
        }
    }
    if !comparison.missing_in_candidate.is_empty() {
        lines.push(String::new());
        lines.push("## Missing In Candidate".to_string());
        for kernel in comparison.missing_in_candidate.iter().take(128) {
            lines.push(format!("- `{kernel}`"));
        }
    }
    if !comparison.checksum_mismatches.is_empty() {
        lines.push(String::new());
        lines.push("## Checksum Mismatches".to_string());
        for row in comparison.checksum_mismatches.iter().take(128) {
            lines.push(format!(
                "- `{}` baseline={} candidate={}",
                row.kernel, row.baseline_checksum, row.candidate_checksum
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn log_strategy() -> impl Strategy<Value = String> {
        proptest::collection::vec(
            ("[a-z][a-z0-9_]{0,8}", "[0-9]{1,5}", "0x[0-9a-f]{1,8}"),
            0..8,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .map(|(k, t, c)| format!("{k} {t} {c}\n"))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_self_comparison_is_ok(log in log_strategy()) {
            let comparison = compare_logs(&log, &log, None);
            prop_assert!(comparison.ok);
            prop_assert_eq!(comparison.checksum_mismatch_count, 0);
        }

        #[test]
        fn prop_mismatch_set_is_symmetric(a in log_strategy(), b in log_strategy()) {
            let forward = compare_logs(&a, &b, None);
            let reverse = compare_logs(&b, &a, None);
            prop_assert_eq!(forward.kernels_compared, reverse.kernels_compared);
            prop_assert_eq!(forward.checksum_mismatch_count, reverse.checksum_mismatch_count);
            prop_assert_eq!(forward.ok, reverse.ok);
            prop_assert_eq!(forward.missing_in_baseline, reverse.missing_in_candidate);
        }
    }
}
