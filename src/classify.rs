//! Strict vectorization classifier
//!
//! Fuses compiler loop remarks and disassembly evidence for one kernel
//! into a single verdict. A kernel is credited as
//! strictly vectorized only when the remark says the loop lowered to a
//! vector block AND the disassembly shows the policy-matched block header,
//! a reachable vector instruction, and a decoupled-body transfer. Everything
//! else lands in exactly one gap bucket with a suggested next action.

use crate::disasm::DisasmEvidence;
use crate::remarks::{LoopRemark, RemarkStatus};
use serde::Serialize;
use std::collections::HashMap;

/// Canonical prefix of a remark reason that credits a lowered vector block
pub const LOWERED_BLOCK_PREFIX: &str = "lowered_vblock";

/// Sentinel reason for kernels with no remark records at all
pub const NO_REMARKS_REASON: &str = "no_remarks_for_kernel";

/// Fixed failure taxonomy. Order matters twice: the `from_reason` rules are
/// evaluated top-to-bottom (first match wins), and gap-plan reports list
/// buckets in `ALL` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapBucket {
    LoopRemovedBeforePass,
    UnsupportedValueExpression,
    NonAffineAddress,
    InnerControlFlow,
    ReductionsLiveOut,
    NoStoreLoops,
    Other,
}

const CONTROL_FLOW_REASONS: &[&str] = &[
    "inner_control_flow",
    "complex_control_flow",
    "not_innermost_loop",
    "not_loop_simplify",
    "preheader_not_simple_branch",
    "unsupported_inner_backedge",
    "unsupported_branch_condition",
    "unsupported_branch_predicate",
    "unsupported_branch_fcmp_condition",
    "unsupported_terminator",
];

const REDUCTION_REASONS: &[&str] = &[
    "value_live_out",
    "unsupported_reduction_kind",
    "unsupported_reduction_init",
    "unsupported_reduction_value",
];

impl GapBucket {
    /// Report ordering of the taxonomy
    pub const ALL: [GapBucket; 7] = [
        GapBucket::LoopRemovedBeforePass,
        GapBucket::UnsupportedValueExpression,
        GapBucket::NonAffineAddress,
        GapBucket::InnerControlFlow,
        GapBucket::ReductionsLiveOut,
        GapBucket::NoStoreLoops,
        GapBucket::Other,
    ];

    /// Stable wire tag for this bucket
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoopRemovedBeforePass => "loop_removed_before_pass",
            Self::UnsupportedValueExpression => "unsupported_value_expression",
            Self::NonAffineAddress => "non_affine_address",
            Self::InnerControlFlow => "inner_control_flow",
            Self::ReductionsLiveOut => "reductions_live_out",
            Self::NoStoreLoops => "no_store_loops",
            Self::Other => "other",
        }
    }

    /// Suggested remediation for the bucket; reporting only, never control
    /// flow.
    #[must_use]
    pub fn next_action(self) -> &'static str {
        match self {
            Self::LoopRemovedBeforePass => "adjust_pass_pipeline_or_loop_preservation",
            Self::UnsupportedValueExpression => "extend_emit_value_semantics",
            Self::NonAffineAddress => "extend_address_lowering_or_fallback",
            Self::InnerControlFlow => "if_convert_or_predicate_lowering",
            Self::ReductionsLiveOut => "add_reduction_and_liveout_lowering",
            Self::NoStoreLoops => "support_reduction_only_vector_loops",
            Self::Other => "manual_triage",
        }
    }

    /// Map a reject reason to its bucket. Total: every string maps to
    /// exactly one bucket; unrecognized strings fall through to `Other`.
    #[must_use]
    pub fn from_reason(reason: &str) -> Self {
        let text = reason.trim();
        if text.is_empty() {
            return Self::Other;
        }
        if matches!(
            text,
            "no_loop_candidate" | "no_tripcount_expr" | "tripcount_expand_failed"
        ) {
            return Self::LoopRemovedBeforePass;
        }
        if text.starts_with("unsupported_value_expr:") {
            return Self::UnsupportedValueExpression;
        }
        if text.contains("non_affine") || text == "unsupported_store_stride" {
            return Self::NonAffineAddress;
        }
        if CONTROL_FLOW_REASONS.contains(&text) {
            return Self::InnerControlFlow;
        }
        if REDUCTION_REASONS.contains(&text) {
            return Self::ReductionsLiveOut;
        }
        if text == "no_store_in_loop" {
            return Self::NoStoreLoops;
        }
        Self::Other
    }
}

/// Which block header kind the chosen remark entitles us to expect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedHeader {
    /// Memory-touching loop: `BSTART.MSEQ` or `BSTART.MPAR`
    Memory,
    /// Tile-only loop: `BSTART.VSEQ` or `BSTART.VPAR`
    Tile,
    /// Memory traffic unknown: either header kind is accepted
    Any,
}

impl ExpectedHeader {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "mseq_or_mpar",
            Self::Tile => "vseq_or_vpar",
            Self::Any => "any_vector_header",
        }
    }
}

/// One kernel's fused verdict plus every field an audit needs to replay it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub kernel: String,
    pub function_candidates: Vec<String>,
    pub resolved_symbol: Option<String>,
    pub status: String,
    pub reason: String,
    /// `"lowered"` for strict passes, else the gap-bucket tag
    pub bucket: String,
    pub configured_mode: String,
    pub selected_mode: String,
    pub lane_count: i64,
    pub group_count: i64,
    pub force_scalar_lane: bool,
    pub has_recurrence: bool,
    pub header_kind: String,
    pub touches_memory: Option<bool>,
    pub tripcount_source: String,
    pub address_model: String,
    pub loop_rows_total: usize,
    pub lowered_loops: usize,
    pub reject_loops: usize,
    pub asm_has_any_vector_header: bool,
    pub asm_has_mem_header: bool,
    pub asm_has_tile_header: bool,
    pub asm_header_expected_kind: String,
    pub asm_header_matches_policy: bool,
    pub asm_has_btext: bool,
    pub asm_has_vec_insn: bool,
    pub strict_vectorized: bool,
}

/// Most frequent reason among reject remarks, ties broken by first-seen
/// order. Counting is done over a first-seen-ordered vector so the result
/// is deterministic regardless of map iteration order.
fn most_frequent_reject_reason(rejects: &[&LoopRemark]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for remark in rejects {
        match counts.iter_mut().find(|(r, _)| *r == remark.reason) {
            Some((_, n)) => *n += 1,
            None => counts.push((&remark.reason, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (reason, n) in counts {
        match best {
            // Strictly greater keeps the earlier entry on ties.
            Some((_, best_n)) if n <= best_n => {}
            _ => best = Some((reason, n)),
        }
    }
    best.map_or_else(|| "reject_unknown".to_string(), |(r, _)| r.to_string())
}

/// Classify one kernel from its remark rows and disassembly evidence.
/// Pure: identical inputs always produce an identical result.
#[must_use]
pub fn classify_kernel(
    kernel: &str,
    remarks_by_function: &HashMap<String, Vec<LoopRemark>>,
    evidence: &DisasmEvidence,
    mode_label: &str,
) -> ClassificationResult {
    let candidates = [kernel.to_string(), format!("_{kernel}")];
    let linked: Vec<&LoopRemark> = candidates
        .iter()
        .filter_map(|name| remarks_by_function.get(name))
        .flatten()
        .collect();

    let lowered: Vec<&LoopRemark> = linked
        .iter()
        .copied()
        .filter(|r| r.status == RemarkStatus::Lowered)
        .collect();
    let rejects: Vec<&LoopRemark> = linked
        .iter()
        .copied()
        .filter(|r| r.status == RemarkStatus::Reject)
        .collect();

    let (chosen, status, reason): (Option<&LoopRemark>, &str, String) = if !lowered.is_empty() {
        let chosen = lowered
            .iter()
            .copied()
            .find(|r| r.reason.starts_with(LOWERED_BLOCK_PREFIX))
            .unwrap_or(lowered[0]);
        (Some(chosen), "lowered", chosen.reason.clone())
    } else if !rejects.is_empty() {
        (Some(rejects[0]), "reject", most_frequent_reject_reason(&rejects))
    } else {
        (None, "reject", NO_REMARKS_REASON.to_string())
    };

    let touches_memory = chosen.and_then(|c| c.touches_memory);
    let (expected_header, header_matches) = match touches_memory {
        Some(true) => (ExpectedHeader::Memory, evidence.has_mem_block),
        Some(false) => (ExpectedHeader::Tile, evidence.has_tile_block),
        None => (
            ExpectedHeader::Any,
            evidence.has_mem_block || evidence.has_tile_block,
        ),
    };

    let has_strict_lowering_reason =
        status == "lowered" && reason.starts_with(LOWERED_BLOCK_PREFIX);
    let strict_vectorized = has_strict_lowering_reason
        && header_matches
        && evidence.has_vec_insn
        && evidence.has_btext;

    let bucket = if strict_vectorized {
        "lowered".to_string()
    } else {
        GapBucket::from_reason(&reason).as_str().to_string()
    };

    ClassificationResult {
        kernel: kernel.to_string(),
        function_candidates: candidates.to_vec(),
        resolved_symbol: evidence.resolved_symbol.clone(),
        status: status.to_string(),
        reason,
        bucket,
        configured_mode: chosen
            .and_then(|c| c.configured_mode.clone())
            .unwrap_or_else(|| mode_label.to_string()),
        selected_mode: chosen
            .and_then(|c| c.selected_mode.clone())
            .unwrap_or_else(|| "mseq".to_string()),
        lane_count: chosen.map_or(0, |c| c.lane_count),
        group_count: chosen.map_or(0, |c| c.group_count),
        force_scalar_lane: chosen.is_some_and(|c| c.force_scalar_lane),
        has_recurrence: chosen.is_some_and(|c| c.has_recurrence),
        header_kind: chosen.map_or_else(String::new, |c| c.header_kind.clone()),
        touches_memory,
        tripcount_source: chosen.map_or_else(String::new, |c| c.tripcount_source.clone()),
        address_model: chosen.map_or_else(String::new, |c| c.address_model.clone()),
        loop_rows_total: linked.len(),
        lowered_loops: lowered.len(),
        reject_loops: rejects.len(),
        asm_has_any_vector_header: evidence.has_mem_block || evidence.has_tile_block,
        asm_has_mem_header: evidence.has_mem_block,
        asm_has_tile_header: evidence.has_tile_block,
        asm_header_expected_kind: expected_header.as_str().to_string(),
        asm_header_matches_policy: header_matches,
        asm_has_btext: evidence.has_btext,
        asm_has_vec_insn: evidence.has_vec_insn,
        strict_vectorized,
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_bucket_total_over_arbitrary_reasons(reason in ".{0,64}") {
            // Never panics, and the result is always a member of the taxonomy.
            let bucket = GapBucket::from_reason(&reason);
            prop_assert!(GapBucket::ALL.contains(&bucket));
        }

        #[test]
        fn prop_strict_requires_all_four_conditions(
            mem in any::<bool>(),
            tile in any::<bool>(),
            vec in any::<bool>(),
            btext in any::<bool>(),
        ) {
            let map = crate::remarks::group_by_function(crate::remarks::parse_remarks_text(
                r#"{"function": "k", "status": "lowered", "reason": "lowered_vblock_memseq", "touches_memory": true}"#,
            ));
            let ev = DisasmEvidence {
                kernel: "k".to_string(),
                resolved_symbol: Some("k".to_string()),
                has_mem_block: mem,
                has_tile_block: tile,
                has_vec_insn: vec,
                has_btext: btext,
            };
            let result = classify_kernel("k", &map, &ev, "auto");
            prop_assert_eq!(result.strict_vectorized, mem && vec && btext);
        }
    }
}
