//! Coverage, remarks-summary, and gap-plan report builders
//!
//! Turns a batch of per-kernel classification rows into the three JSON
//! payloads and the markdown summary an audit run emits. Builders are pure;
//! writing is left to [`crate::output`].

use crate::classify::{ClassificationResult, GapBucket};
use crate::error::{AuditError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const METRIC_NAME: &str = "strict_lowered_loops";
const METRIC_DESCRIPTION: &str = "Vectorized iff remarks report lowered_vblock* and disassembly has \
     policy-matched vector header (MSEQ/MPAR for memory loops, \
     VSEQ/VPAR for tile-only loops) + B.TEXT + reachable v.* body ops.";

/// Artifact paths recorded inside the coverage payload
#[derive(Debug, Clone, Default)]
pub struct ReportInputs {
    pub objdump: String,
    pub remarks_jsonl: Option<String>,
    pub kernel_out_dir: String,
}

/// Top-level coverage artifact
#[derive(Debug, Clone, Serialize)]
pub struct CoveragePayload {
    pub mode: String,
    pub metric: String,
    pub metric_description: String,
    pub total: usize,
    pub vectorized: usize,
    pub non_vectorized: usize,
    pub coverage_percent: f64,
    pub vectorized_kernels: Vec<String>,
    pub non_vectorized_kernels: Vec<String>,
    pub missing_functions: Vec<String>,
    pub objdump: String,
    pub remarks_jsonl: Option<String>,
    pub kernel_out_dir: String,
}

/// Every per-kernel row, verbatim, for downstream tooling
#[derive(Debug, Clone, Serialize)]
pub struct RemarksSummaryPayload {
    pub mode: String,
    pub total_kernels: usize,
    pub strict_vectorized_kernels: usize,
    pub rows: Vec<ClassificationResult>,
}

/// One non-vectorized kernel's entry in the gap plan
#[derive(Debug, Clone, Serialize)]
pub struct KernelPlanEntry {
    pub kernel: String,
    pub bucket: String,
    pub reason: String,
    pub configured_mode: String,
    pub selected_mode: String,
    pub header_kind: String,
    pub touches_memory: Option<bool>,
    pub lane_count: i64,
    pub group_count: i64,
    pub force_scalar_lane: bool,
    pub loop_rows_total: usize,
    pub next_action: String,
}

/// Bucketed remediation plan for everything that missed the strict metric
#[derive(Debug, Clone, Serialize)]
pub struct GapPlanPayload {
    pub mode: String,
    pub total_kernels: usize,
    pub vectorized_kernels: usize,
    pub non_vectorized_kernels: usize,
    pub missing_functions: Vec<String>,
    pub bucket_counts: BTreeMap<String, usize>,
    pub buckets: BTreeMap<String, Vec<String>>,
    pub kernel_plan: Vec<KernelPlanEntry>,
}

/// Coverage percentage rounded to two decimals; zero kernels yields 0.0
#[must_use]
pub fn coverage_percent(vectorized: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = 100.0 * vectorized as f64 / total as f64;
    (raw * 100.0).round() / 100.0
}

fn vectorized_kernels(rows: &[ClassificationResult]) -> Vec<String> {
    rows.iter()
        .filter(|r| r.strict_vectorized)
        .map(|r| r.kernel.clone())
        .collect()
}

fn non_vectorized_kernels(rows: &[ClassificationResult]) -> Vec<String> {
    rows.iter()
        .filter(|r| !r.strict_vectorized)
        .map(|r| r.kernel.clone())
        .collect()
}

fn missing_functions(rows: &[ClassificationResult]) -> Vec<String> {
    rows.iter()
        .filter(|r| r.resolved_symbol.is_none())
        .map(|r| r.kernel.clone())
        .collect()
}

/// Build the coverage payload from classified rows, in kernel-list order
#[must_use]
pub fn build_coverage(
    mode: &str,
    rows: &[ClassificationResult],
    inputs: &ReportInputs,
) -> CoveragePayload {
    let vectorized = vectorized_kernels(rows);
    let non_vectorized = non_vectorized_kernels(rows);
    CoveragePayload {
        mode: mode.to_string(),
        metric: METRIC_NAME.to_string(),
        metric_description: METRIC_DESCRIPTION.to_string(),
        total: rows.len(),
        vectorized: vectorized.len(),
        non_vectorized: non_vectorized.len(),
        coverage_percent: coverage_percent(vectorized.len(), rows.len()),
        vectorized_kernels: vectorized,
        non_vectorized_kernels: non_vectorized,
        missing_functions: missing_functions(rows),
        objdump: inputs.objdump.clone(),
        remarks_jsonl: inputs.remarks_jsonl.clone(),
        kernel_out_dir: inputs.kernel_out_dir.clone(),
    }
}

/// Build the full-row summary payload
#[must_use]
pub fn build_remarks_summary(mode: &str, rows: &[ClassificationResult]) -> RemarksSummaryPayload {
    RemarksSummaryPayload {
        mode: mode.to_string(),
        total_kernels: rows.len(),
        strict_vectorized_kernels: rows.iter().filter(|r| r.strict_vectorized).count(),
        rows: rows.to_vec(),
    }
}

/// Build the gap plan. Every bucket appears in the maps, empty or not, and
/// unrecognized bucket tags collapse into `other`.
#[must_use]
pub fn build_gap_plan(mode: &str, rows: &[ClassificationResult]) -> GapPlanPayload {
    let mut bucket_kernels: BTreeMap<String, Vec<String>> = GapBucket::ALL
        .iter()
        .map(|b| (b.as_str().to_string(), Vec::new()))
        .collect();
    let mut kernel_plan = Vec::new();

    for row in rows.iter().filter(|r| !r.strict_vectorized) {
        let bucket = if bucket_kernels.contains_key(&row.bucket) {
            row.bucket.clone()
        } else {
            GapBucket::Other.as_str().to_string()
        };
        let next_action = GapBucket::ALL
            .iter()
            .find(|b| b.as_str() == bucket)
            .map_or(GapBucket::Other, |b| *b)
            .next_action()
            .to_string();
        if let Some(list) = bucket_kernels.get_mut(&bucket) {
            list.push(row.kernel.clone());
        }
        kernel_plan.push(KernelPlanEntry {
            kernel: row.kernel.clone(),
            bucket,
            reason: row.reason.clone(),
            configured_mode: row.configured_mode.clone(),
            selected_mode: row.selected_mode.clone(),
            header_kind: row.header_kind.clone(),
            touches_memory: row.touches_memory,
            lane_count: row.lane_count,
            group_count: row.group_count,
            force_scalar_lane: row.force_scalar_lane,
            loop_rows_total: row.loop_rows_total,
            next_action,
        });
    }

    let mut missing = missing_functions(rows);
    missing.sort();
    let vectorized_count = rows.iter().filter(|r| r.strict_vectorized).count();
    GapPlanPayload {
        mode: mode.to_string(),
        total_kernels: rows.len(),
        vectorized_kernels: vectorized_count,
        non_vectorized_kernels: rows.len() - vectorized_count,
        missing_functions: missing,
        bucket_counts: bucket_kernels
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect(),
        buckets: bucket_kernels,
        kernel_plan,
    }
}

/// Human-readable coverage summary; kernel lists truncated so a run over
/// the full suite stays readable.
#[must_use]
pub fn coverage_markdown(coverage: &CoveragePayload, gap_plan: &GapPlanPayload) -> String {
    let mut lines = vec![
        "# TSVC strict auto-vectorization coverage".to_string(),
        String::new(),
        format!("- Mode: `{}`", coverage.mode),
        format!("- Objdump: `{}`", coverage.objdump),
        format!("- Kernels total: `{}`", coverage.total),
        format!("- Strict vectorized kernels: `{}`", coverage.vectorized),
        format!(
            "- Strict non-vectorized kernels: `{}`",
            coverage.non_vectorized
        ),
        format!("- Coverage: `{:.2}%`", coverage.coverage_percent),
        String::new(),
        "## Strict metric".to_string(),
        "- Requires both remark-level lowering and decoupled body assembly evidence:".to_string(),
        "  - `reason` starts with `lowered_vblock`".to_string(),
        "  - root function has policy-matched header and `B.TEXT`:".to_string(),
        "    - `touches_memory=true` -> `BSTART.MSEQ`/`BSTART.MPAR`".to_string(),
        "    - `touches_memory=false` -> `BSTART.VSEQ`/`BSTART.VPAR`".to_string(),
        "  - `B.TEXT`-reachable body contains `v.*` operations".to_string(),
    ];
    if !coverage.missing_functions.is_empty() {
        lines.push(String::new());
        lines.push("## Missing kernel symbols".to_string());
        for kernel in coverage.missing_functions.iter().take(64) {
            lines.push(format!("- `{kernel}`"));
        }
        if coverage.missing_functions.len() > 64 {
            lines.push(format!(
                "- ... ({} more)",
                coverage.missing_functions.len() - 64
            ));
        }
    }
    if !coverage.non_vectorized_kernels.is_empty() {
        lines.push(String::new());
        lines.push("## Non-vectorized kernels".to_string());
        for kernel in coverage.non_vectorized_kernels.iter().take(128) {
            lines.push(format!("- `{kernel}`"));
        }
        if coverage.non_vectorized_kernels.len() > 128 {
            lines.push(format!(
                "- ... ({} more)",
                coverage.non_vectorized_kernels.len() - 128
            ));
        }
    }
    lines.push(String::new());
    lines.push("## Gap buckets".to_string());
    for bucket in GapBucket::ALL {
        let count = gap_plan
            .bucket_counts
            .get(bucket.as_str())
            .copied()
            .unwrap_or(0);
        lines.push(format!("- `{}`: `{count}`", bucket.as_str()));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// True when the strict count clears the gate; `None` disables the gate
#[must_use]
pub fn coverage_gate_passes(vectorized: usize, fail_under: Option<usize>) -> bool {
    fail_under.is_none_or(|floor| vectorized >= floor)
}

/// Read a kernel-list file: one kernel per line, blanks and `#` comments
/// skipped. An empty list is a configuration error, never a vacuous pass.
pub fn read_kernel_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let kernels: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if kernels.is_empty() {
        return Err(AuditError::config(format!(
            "kernel list is empty: {}",
            path.display()
        )));
    }
    Ok(kernels)
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::classify::classify_kernel;
    use crate::disasm::DisasmEvidence;
    use crate::remarks::{group_by_function, parse_remarks_text};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn rows_with(total: usize, strict: usize) -> Vec<ClassificationResult> {
        (0..total)
            .map(|i| {
                let kernel = format!("k{i}");
                if i < strict {
                    let map = group_by_function(parse_remarks_text(&format!(
                        r#"{{"function": "{kernel}", "status": "lowered", "reason": "lowered_vblock_memseq", "touches_memory": true}}"#,
                    )));
                    let ev = DisasmEvidence {
                        kernel: kernel.clone(),
                        resolved_symbol: Some(kernel.clone()),
                        has_mem_block: true,
                        has_tile_block: false,
                        has_vec_insn: true,
                        has_btext: true,
                    };
                    classify_kernel(&kernel, &map, &ev, "auto")
                } else {
                    classify_kernel(
                        &kernel,
                        &HashMap::new(),
                        &DisasmEvidence::unresolved(&kernel),
                        "auto",
                    )
                }
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_coverage_counts_partition_and_percent_bounded(
            total in 0usize..24,
            strict_seed in 0usize..24,
        ) {
            let strict = strict_seed.min(total);
            let rows = rows_with(total, strict);
            let coverage = build_coverage("auto", &rows, &ReportInputs::default());

            prop_assert_eq!(coverage.total, total);
            prop_assert_eq!(coverage.vectorized, strict);
            prop_assert_eq!(coverage.vectorized + coverage.non_vectorized, total);
            prop_assert!(coverage.coverage_percent >= 0.0);
            prop_assert!(coverage.coverage_percent <= 100.0);

            let plan = build_gap_plan("auto", &rows);
            let bucketed: usize = plan.bucket_counts.values().sum();
            prop_assert_eq!(bucketed, coverage.non_vectorized);
        }
    }
}
