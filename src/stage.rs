//! TSVC source staging
//!
//! Copies the TSVC suite into a scratch directory and applies the audit's
//! source rewrites before any compile: canonical profile macros, runtime
//! helper injection to keep degenerate loops alive, the bare-metal
//! `time_function` body, and the parity-policy literal canonicalizations.
//! Every rewrite that must land exactly once is verified and fatal when it
//! does not.

use crate::error::{AuditError, Result};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Canonical bring-up profile
pub const CANONICAL_ITERATIONS: i64 = 32;
pub const CANONICAL_LEN_1D: i64 = 320;
pub const CANONICAL_LEN_2D: i64 = 16;

/// Files a usable TSVC source tree must contain
pub const REQUIRED_SOURCES: [&str; 5] =
    ["common.h", "tsvc.c", "common.c", "dummy.c", "array_defs.h"];

const RUNTIME_HELPER_DECLS: &str = "\n\
    // Runtime macro helpers used to prevent compile-time loop deletion.\n\
    int tsvc_runtime_iterations(void);\n\
    int tsvc_runtime_len_1d(void);\n";

const RUNTIME_HELPER_DEFS: &str = "\n\
    __attribute__((noinline)) int tsvc_runtime_iterations(void) { return iterations; }\n\
    __attribute__((noinline)) int tsvc_runtime_len_1d(void) { return LEN_1D; }\n";

const TIME_FUNCTION_BODY: &str = "void time_function(test_function_t vector_func, void * arg_info)\n\
    {\n\
    \x20   struct args_t func_args = {.arg_info=arg_info};\n\
    \n\
    \x20   real_t result = vector_func(&func_args);\n\
    \n\
    \x20   uint64_t t1_us = (uint64_t)func_args.t1.tv_sec * 1000000ull + (uint64_t)func_args.t1.tv_usec;\n\
    \x20   uint64_t t2_us = (uint64_t)func_args.t2.tv_sec * 1000000ull + (uint64_t)func_args.t2.tv_usec;\n\
    \x20   uint64_t taken_us = t2_us - t1_us;\n\
    \n\
    \x20   union { real_t f; uint32_t u; } bits;\n\
    \x20   bits.f = result;\n\
    \n\
    \x20   printf(\"%llu\\t0x%08x\\n\", (unsigned long long)taken_us, bits.u);\n\
    }\n";

/// Which source-text policy the staged tree follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcePolicy {
    /// Canonicalize divide literals so codegen matches the v0.3 parity gate
    #[default]
    LinxParity,
    /// Leave kernel bodies untouched
    Upstream,
}

impl SourcePolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinxParity => "linx-v03-parity",
            Self::Upstream => "upstream",
        }
    }
}

impl std::str::FromStr for SourcePolicy {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linx-v03-parity" => Ok(Self::LinxParity),
            "upstream" => Ok(Self::Upstream),
            other => Err(AuditError::config(format!(
                "unsupported source policy: {other}"
            ))),
        }
    }
}

/// Staging knobs; defaults are the canonical profile
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub iterations: i64,
    pub len_1d: i64,
    pub len_2d: i64,
    pub kernel_regex: Option<String>,
    pub source_policy: SourcePolicy,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            iterations: CANONICAL_ITERATIONS,
            len_1d: CANONICAL_LEN_1D,
            len_2d: CANONICAL_LEN_2D,
            kernel_regex: None,
            source_policy: SourcePolicy::default(),
        }
    }
}

impl StageOptions {
    /// The array layout assumes LEN_1D splits into 40-element sections
    pub fn validate(&self) -> Result<()> {
        if self.iterations <= 0 || self.len_1d <= 0 || self.len_2d <= 0 {
            return Err(AuditError::config("iterations/len values must be > 0"));
        }
        if self.len_1d % 40 != 0 {
            return Err(AuditError::config("len_1d must be a multiple of 40"));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.iterations == CANONICAL_ITERATIONS
            && self.len_1d == CANONICAL_LEN_1D
            && self.len_2d == CANONICAL_LEN_2D
    }
}

/// One source canonicalization that fired, recorded for the gate report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRule {
    pub function: String,
    pub rule: String,
    pub count: usize,
}

/// Result of staging: where the tree landed and what it contains
#[derive(Debug, Clone)]
pub struct StagedSuite {
    pub stage_dir: PathBuf,
    pub kernels: Vec<String>,
    pub canonicalizations: Vec<AppliedRule>,
}

/// Verify a TSVC source tree has everything staging needs
pub fn verify_suite_sources(src_dir: &Path) -> Result<()> {
    if !src_dir.is_dir() {
        return Err(AuditError::config(format!(
            "TSVC source path not found: {}",
            src_dir.display()
        )));
    }
    for name in REQUIRED_SOURCES {
        let path = src_dir.join(name);
        if !path.exists() {
            return Err(AuditError::config(format!(
                "malformed TSVC source tree, missing: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn copy_tree(src_dir: &Path, stage_dir: &Path) -> Result<()> {
    if stage_dir.exists() {
        fs::remove_dir_all(stage_dir)?;
    }
    for entry in WalkDir::new(src_dir) {
        let entry = entry.map_err(|e| {
            AuditError::config(format!("failed to walk {}: {e}", src_dir.display()))
        })?;
        let rel = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| AuditError::config(e.to_string()))?;
        let dest = stage_dir.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Rewrite a `#define NAME <int>` line in place; fatal when the macro is
/// absent, since a silently unpatched profile would poison every result
/// downstream.
pub fn rewrite_macro(text: &str, macro_name: &str, value: i64) -> Result<String> {
    let pattern = format!(r"(?m)^\s*#define\s+{}\s+\d+\s*$", regex::escape(macro_name));
    let re = Regex::new(&pattern).unwrap();
    if !re.is_match(text) {
        return Err(AuditError::config(format!(
            "failed to patch {macro_name} in TSVC common.h"
        )));
    }
    Ok(re
        .replace_all(text, format!("#define {macro_name} {value}"))
        .into_owned())
}

/// Swap the s176 outer bound for its runtime-helper form so the zero-trip
/// outer loop survives into the vectorizer. Exactly one site must match.
pub fn patch_s176_bound(text: &str) -> Result<String> {
    let re = Regex::new(r"4\s*\*\s*\(\s*iterations\s*/\s*LEN_1D\s*\)").unwrap();
    let n = re.find_iter(text).count();
    if n != 1 {
        return Err(AuditError::config(format!(
            "expected to patch exactly 1 s176 outer bound, got {n}"
        )));
    }
    Ok(re
        .replace(text, "4*(tsvc_runtime_iterations()/tsvc_runtime_len_1d())")
        .into_owned())
}

/// Replace the hosted `time_function` with a bare-metal body that prints
/// one `<time_us>\t<checksum>` row per kernel call. Exactly one definition
/// must match.
pub fn replace_time_function(text: &str) -> Result<String> {
    let re = Regex::new(
        r"(?s)void\s+time_function\s*\(\s*test_function_t\s+vector_func\s*,\s*void\s*\*\s*arg_info\s*\)\s*\{.*?\n\}\n",
    )
    .unwrap();
    let matches: Vec<_> = re.find_iter(text).collect();
    if matches.len() != 1 {
        return Err(AuditError::config(format!(
            "expected to patch exactly 1 time_function, got {}",
            matches.len()
        )));
    }
    let m = matches[0];
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..m.start()]);
    out.push_str(TIME_FUNCTION_BODY);
    out.push_str(&text[m.end()..]);
    Ok(out)
}

/// Locate a C function definition and return the byte span of its signature
/// plus balanced body.
#[must_use]
pub fn find_function_span(c_text: &str, func_name: &str) -> Option<(usize, usize)> {
    let pattern = format!(r"\b{}\s*\([^)]*\)\s*\{{", regex::escape(func_name));
    let re = Regex::new(&pattern).unwrap();
    let m = re.find(c_text)?;
    let brace = c_text[m.start()..].find('{')? + m.start();
    let mut depth = 0usize;
    for (offset, ch) in c_text[brace..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((m.start(), brace + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Canonicalize s2111 divide-by-1.9 spellings to the single-precision
/// `/1.9f` form. The trailing capture stands in for a negative lookahead:
/// each pattern also consumes the first non-literal character after the
/// constant and puts it back in the replacement.
pub fn canonicalize_s2111(text: &str) -> Result<(String, Vec<AppliedRule>)> {
    let (begin, end) = find_function_span(text, "s2111").ok_or_else(|| {
        AuditError::config("failed to locate s2111 in staged TSVC source")
    })?;
    let mut fn_text = text[begin..end].to_string();

    let rules: [(&str, Regex); 4] = [
        (
            "s2111_divide_cast_literal",
            Regex::new(r"/\s*\(\s*(?:float|double|real_t)\s*\)\s*1\.9([^0-9fF])").unwrap(),
        ),
        (
            "s2111_divide_cast_literal_nested",
            Regex::new(r"/\s*\(\s*\(\s*(?:float|double|real_t)\s*\)\s*1\.9\s*\)([^0-9fF])")
                .unwrap(),
        ),
        (
            "s2111_divide_parenthesized_literal",
            Regex::new(r"/\s*\(\s*1\.9\s*\)([^0-9fF])").unwrap(),
        ),
        (
            "s2111_divide_literal",
            Regex::new(r"/\s*1\.9([^0-9fF])").unwrap(),
        ),
    ];

    let mut applied = Vec::new();
    for (rule, re) in rules {
        // The consumed boundary character hides a directly adjacent
        // occurrence (`/1.9/1.9`), so replace until a pass finds nothing.
        let mut count = 0;
        loop {
            let n = re.find_iter(&fn_text).count();
            if n == 0 {
                break;
            }
            count += n;
            fn_text = re.replace_all(&fn_text, "/1.9f${1}").into_owned();
        }
        if count > 0 {
            applied.push(AppliedRule {
                function: "s2111".to_string(),
                rule: rule.to_string(),
                count,
            });
        }
    }

    if applied.is_empty() {
        return Ok((text.to_string(), applied));
    }
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..begin]);
    out.push_str(&fn_text);
    out.push_str(&text[end..]);
    Ok((out, applied))
}

/// Pull the ordered kernel list out of the driver's `time_function(&name, ...)`
/// call sites, first occurrence wins.
pub fn extract_kernel_names(tsvc_text: &str) -> Result<Vec<String>> {
    let re = Regex::new(r"time_function\(&([A-Za-z_][A-Za-z0-9_]*)\s*,").unwrap();
    let mut seen = std::collections::HashSet::new();
    let mut ordered = Vec::new();
    for caps in re.captures_iter(tsvc_text) {
        let name = caps[1].to_string();
        if seen.insert(name.clone()) {
            ordered.push(name);
        }
    }
    if ordered.is_empty() {
        return Err(AuditError::config("failed to extract TSVC kernel list"));
    }
    Ok(ordered)
}

fn filter_kernels(
    tsvc_text: &str,
    kernels: Vec<String>,
    kernel_regex: &str,
) -> Result<(String, Vec<String>)> {
    let pattern = Regex::new(kernel_regex)
        .map_err(|e| AuditError::config(format!("invalid kernel regex: {e}")))?;
    let keep: std::collections::HashSet<String> = kernels
        .iter()
        .filter(|k| pattern.is_match(k))
        .cloned()
        .collect();
    if keep.is_empty() {
        return Err(AuditError::config(format!(
            "kernel regex matched 0 kernels: {kernel_regex}"
        )));
    }
    let call_re = Regex::new(r"^\s*time_function\(&([A-Za-z_][A-Za-z0-9_]*)\s*,").unwrap();
    let mut new_lines = Vec::new();
    for line in tsvc_text.lines() {
        match call_re.captures(line) {
            Some(caps) if !keep.contains(&caps[1]) => {
                new_lines.push(format!("    // skipped by kernel filter: {}", line.trim()));
            }
            _ => new_lines.push(line.to_string()),
        }
    }
    let kept: Vec<String> = kernels.into_iter().filter(|k| keep.contains(k)).collect();
    Ok((new_lines.join("\n") + "\n", kept))
}

/// Stage the suite: copy the tree, apply every rewrite, and return the
/// kernel list actually wired into the driver.
pub fn stage_suite(src_dir: &Path, stage_dir: &Path, options: &StageOptions) -> Result<StagedSuite> {
    options.validate()?;
    verify_suite_sources(src_dir)?;
    copy_tree(src_dir, stage_dir)?;

    let common_h = stage_dir.join("common.h");
    let mut common_text = fs::read_to_string(&common_h)?;
    common_text = rewrite_macro(&common_text, "iterations", options.iterations)?;
    common_text = rewrite_macro(&common_text, "LEN_1D", options.len_1d)?;
    common_text = rewrite_macro(&common_text, "LEN_2D", options.len_2d)?;
    if !common_text.contains("tsvc_runtime_iterations") {
        common_text.push_str(RUNTIME_HELPER_DECLS);
    }
    fs::write(&common_h, common_text)?;

    let common_c = stage_dir.join("common.c");
    let mut common_c_text = fs::read_to_string(&common_c)?;
    if !common_c_text.contains("tsvc_runtime_iterations") {
        common_c_text.push_str(RUNTIME_HELPER_DEFS);
        fs::write(&common_c, common_c_text)?;
    }

    let tsvc_c = stage_dir.join("tsvc.c");
    let mut tsvc_text = fs::read_to_string(&tsvc_c)?;
    tsvc_text = patch_s176_bound(&tsvc_text)?;
    if !tsvc_text.contains("<stdint.h>") {
        tsvc_text = tsvc_text.replace(
            "#include <sys/time.h>\n",
            "#include <sys/time.h>\n#include <stdint.h>\n",
        );
    }
    tsvc_text = replace_time_function(&tsvc_text)?;

    let mut canonicalizations = Vec::new();
    if options.source_policy == SourcePolicy::LinxParity {
        let (canonical_text, applied) = canonicalize_s2111(&tsvc_text)?;
        tsvc_text = canonical_text;
        canonicalizations = applied;
    }

    let mut kernels = extract_kernel_names(&tsvc_text)?;
    if let Some(kernel_regex) = &options.kernel_regex {
        let (filtered_text, kept) = filter_kernels(&tsvc_text, kernels, kernel_regex)?;
        tsvc_text = filtered_text;
        kernels = kept;
    }
    fs::write(&tsvc_c, tsvc_text)?;

    Ok(StagedSuite {
        stage_dir: stage_dir.to_path_buf(),
        kernels,
        canonicalizations,
    })
}
