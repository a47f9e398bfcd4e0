//! Disassembly evidence extraction
//!
//! Splits a flat disassembly dump into per-function spans, follows `B.TEXT`
//! control transfers to build a reachability closure per kernel, and probes
//! the closure for the structural markers the strict verdict requires:
//! vector block headers (`BSTART.MSEQ`/`MPAR` for memory loops,
//! `BSTART.VSEQ`/`VPAR` for tile loops) and `v.*` vector instructions.

use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Per-kernel disassembly evidence flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisasmEvidence {
    pub kernel: String,
    /// Symbol the kernel resolved to, or `None` when the kernel never
    /// lowered to a distinct function (optimized away or renamed)
    pub resolved_symbol: Option<String>,
    /// Root body contains a memory-oriented vector block header
    pub has_mem_block: bool,
    /// Root body contains a tile-oriented vector block header
    pub has_tile_block: bool,
    /// A vector-tagged instruction is reachable from the kernel
    pub has_vec_insn: bool,
    /// Root body transfers control into decoupled body text
    pub has_btext: bool,
}

impl DisasmEvidence {
    /// Evidence for a kernel with no resolved symbol: all flags false.
    #[must_use]
    pub fn unresolved(kernel: &str) -> Self {
        Self {
            kernel: kernel.to_string(),
            resolved_symbol: None,
            has_mem_block: false,
            has_tile_block: false,
            has_vec_insn: false,
            has_btext: false,
        }
    }
}

/// Indexed disassembly text: function spans plus the marker patterns
pub struct DisasmIndex {
    functions: HashMap<String, String>,
    re_mem_header: Regex,
    re_tile_header: Regex,
    re_vec_insn: Regex,
    re_btext_target: Regex,
}

impl DisasmIndex {
    /// Split disassembly text into function bodies keyed by symbol name.
    ///
    /// A function starts at a `<hex-address> <symbol>:` header line and runs
    /// until the next header. `.`-prefixed local labels do not start a new
    /// span; their lines belong to the enclosing function.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let re_func = Regex::new(r"^\s*([0-9a-fA-F]+)\s+<([^>]+)>:\s*$").unwrap();
        let mut functions: HashMap<String, Vec<&str>> = HashMap::new();
        let mut current: Option<String> = None;

        for line in text.lines() {
            if let Some(caps) = re_func.captures(line) {
                let name = caps[2].to_string();
                if !name.starts_with('.') {
                    functions.insert(name.clone(), vec![line]);
                    current = Some(name);
                    continue;
                }
            }
            if let Some(name) = &current {
                if let Some(body) = functions.get_mut(name) {
                    body.push(line);
                }
            }
        }

        let functions = functions
            .into_iter()
            .map(|(name, lines)| (name, format!("{}\n", lines.join("\n").trim_end())))
            .collect();

        Self {
            functions,
            re_mem_header: Regex::new(r"(?i)\bbstart\.(?:mseq|mpar)\b").unwrap(),
            re_tile_header: Regex::new(r"(?i)\bbstart\.(?:vseq|vpar)\b").unwrap(),
            re_vec_insn: Regex::new(r"(?i)\bv\.[a-z0-9_]+").unwrap(),
            re_btext_target: Regex::new(r"(?i)\bb\.text\s+([A-Za-z0-9_.$]+)").unwrap(),
        }
    }

    /// Number of function spans found.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Body text of one function, if present.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&str> {
        self.functions.get(name).map(String::as_str)
    }

    /// Resolve a kernel name to a disassembly symbol: the bare name first,
    /// then a single leading-underscore variant.
    #[must_use]
    pub fn resolve(&self, kernel: &str) -> Option<String> {
        if self.functions.contains_key(kernel) {
            return Some(kernel.to_string());
        }
        let prefixed = format!("_{kernel}");
        if self.functions.contains_key(&prefixed) {
            return Some(prefixed);
        }
        None
    }

    /// Concatenated bodies of every function reachable from `root` through
    /// `B.TEXT` transfers. Explicit worklist with a visited set, so
    /// self-recursive and mutually-recursive transfers terminate; targets
    /// without a matching span are dropped.
    #[must_use]
    pub fn reachable_body(&self, root: &str) -> String {
        let mut visited: HashSet<String> = HashSet::new();
        let mut worklist: Vec<String> = vec![root.to_string()];
        let mut chunks: Vec<&str> = Vec::new();

        while let Some(name) = worklist.pop() {
            if visited.contains(&name) {
                continue;
            }
            let Some(body) = self.functions.get(&name) else {
                continue;
            };
            visited.insert(name);
            chunks.push(body);
            for caps in self.re_btext_target.captures_iter(body) {
                let target = &caps[1];
                if !visited.contains(target) && self.functions.contains_key(target) {
                    worklist.push(target.to_string());
                }
            }
        }

        format!("{}\n", chunks.join("\n").trim_end())
    }

    /// Compute the evidence flags for one kernel, plus the closure text for
    /// per-kernel audit files. Header and transfer flags are probed on the
    /// root body only; the vector-instruction flag covers the whole closure.
    #[must_use]
    pub fn evidence(&self, kernel: &str) -> (DisasmEvidence, Option<String>) {
        let Some(symbol) = self.resolve(kernel) else {
            return (DisasmEvidence::unresolved(kernel), None);
        };
        let root_body = &self.functions[&symbol];
        let closure = self.reachable_body(&symbol);

        let evidence = DisasmEvidence {
            kernel: kernel.to_string(),
            resolved_symbol: Some(symbol),
            has_mem_block: self.re_mem_header.is_match(root_body),
            has_tile_block: self.re_tile_header.is_match(root_body),
            has_vec_insn: self.re_vec_insn.is_match(&closure),
            has_btext: self.re_btext_target.is_match(root_body),
        };
        (evidence, Some(closure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
0000000000010000 <s2111>:
   10000: 00 01 02 03   bstart.mseq x1, x2
   10004: 04 05 06 07   b.text s2111_body
   10008: 08 09 0a 0b   ret

0000000000010100 <s2111_body>:
   10100: 0c 0d 0e 0f   v.add v0, v1, v2
   10104: 10 11 12 13   v.store v0, [x3]

0000000000010200 <.local_label>:
   10200: 14 15 16 17   nop

0000000000010300 <scalar_fn>:
   10300: 18 19 1a 1b   add x1, x2, x3
";

    #[test]
    fn test_split_functions() {
        let index = DisasmIndex::parse(SAMPLE);

        assert!(index.function("s2111").is_some());
        assert!(index.function("s2111_body").is_some());
        assert!(index.function("scalar_fn").is_some());
        // Local labels do not start a span; their lines attach upstream.
        assert!(index.function(".local_label").is_none());
        assert!(index.function("s2111_body").unwrap().contains(".local_label"));
    }

    #[test]
    fn test_resolve_bare_and_prefixed() {
        let text = "0000000000010000 <_s176>:\n   10000: 00 01 02 03   ret\n";
        let index = DisasmIndex::parse(text);

        assert_eq!(index.resolve("s176"), Some("_s176".to_string()));
        assert_eq!(index.resolve("_s176"), Some("_s176".to_string()));
        assert_eq!(index.resolve("missing"), None);
    }

    #[test]
    fn test_reachable_body_follows_btext() {
        let index = DisasmIndex::parse(SAMPLE);
        let closure = index.reachable_body("s2111");

        assert!(closure.contains("bstart.mseq"));
        assert!(closure.contains("v.add"));
        assert!(!closure.contains("scalar_fn"));
    }

    #[test]
    fn test_reachable_body_cycle_safe() {
        let text = "\
0000000000010000 <a>:
   10000: 00 00 00 00   b.text b
0000000000010100 <b>:
   10100: 00 00 00 00   b.text a
";
        let index = DisasmIndex::parse(text);
        let closure = index.reachable_body("a");

        // Each body appears exactly once despite the mutual transfer.
        assert_eq!(closure.matches("<a>:").count(), 1);
        assert_eq!(closure.matches("<b>:").count(), 1);
    }

    #[test]
    fn test_unresolved_transfer_target_dropped() {
        let text = "0000000000010000 <a>:\n   10000: 00 00 00 00   b.text nowhere\n";
        let index = DisasmIndex::parse(text);
        let closure = index.reachable_body("a");
        assert!(closure.contains("<a>:"));
    }

    #[test]
    fn test_evidence_flags_for_vectorized_kernel() {
        let index = DisasmIndex::parse(SAMPLE);
        let (evidence, closure) = index.evidence("s2111");

        assert_eq!(evidence.resolved_symbol.as_deref(), Some("s2111"));
        assert!(evidence.has_mem_block);
        assert!(!evidence.has_tile_block);
        assert!(evidence.has_vec_insn);
        assert!(evidence.has_btext);
        assert!(closure.unwrap().contains("v.add"));
    }

    #[test]
    fn test_evidence_vec_insn_only_in_closure() {
        // The root body has no v.* op; only the decoupled body does.
        let index = DisasmIndex::parse(SAMPLE);
        let (evidence, _) = index.evidence("s2111");
        assert!(evidence.has_vec_insn);

        let (scalar, _) = index.evidence("scalar_fn");
        assert!(!scalar.has_vec_insn);
        assert!(!scalar.has_btext);
    }

    #[test]
    fn test_evidence_unresolved_kernel() {
        let index = DisasmIndex::parse(SAMPLE);
        let (evidence, closure) = index.evidence("s000");

        assert_eq!(evidence, DisasmEvidence::unresolved("s000"));
        assert!(closure.is_none());
    }

    #[test]
    fn test_tile_header_detected() {
        let text = "0000000000010000 <t1>:\n   10000: 00 00 00 00   BSTART.VPAR x1\n";
        let index = DisasmIndex::parse(text);
        let (evidence, _) = index.evidence("t1");

        assert!(evidence.has_tile_block);
        assert!(!evidence.has_mem_block);
    }
}
