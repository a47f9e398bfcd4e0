//! End-to-end audit pipeline
//!
//! Stages the suite once, builds the shared runtime objects, then walks the
//! configured vector modes: compile, link, disassemble, optionally emulate,
//! analyze, and write per-mode artifacts. After all modes the selected
//! mode's reports are mirrored to unsuffixed paths, the optional baseline
//! checksum comparison runs, and the aggregate gate result is written.
//! Reports are always written in full before any gate is evaluated.

use crate::checksum::{self, ChecksumComparison};
use crate::classify::{classify_kernel, ClassificationResult};
use crate::disasm::DisasmIndex;
use crate::driver::{
    compile_flags, parse_kernel_checksums, verify_run_output, Builder, VectorMode,
};
use crate::error::{AuditError, Result};
use crate::output;
use crate::remarks::load_remarks;
use crate::report::{
    build_coverage, build_gap_plan, build_remarks_summary, coverage_gate_passes,
    coverage_markdown, CoveragePayload, ReportInputs,
};
use crate::stage::{stage_suite, StageOptions, StagedSuite};
use crate::toolchain::{Toolchain, ToolchainSpec};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything a `run` invocation needs, resolved from the CLI
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub toolchain: ToolchainSpec,
    pub target: String,
    pub tsvc_src: PathBuf,
    pub runtime_dir: Option<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub stage: StageOptions,
    pub modes: Vec<VectorMode>,
    pub run_emulator: bool,
    pub emulator_timeout: f64,
    pub strict_fail_under: Option<usize>,
    pub compare_baseline_log: Option<PathBuf>,
    pub checksum_report_json: Option<PathBuf>,
    pub fail_on_checksum_mismatch: bool,
    pub out_dir: PathBuf,
    pub verbose: bool,
}

/// Analysis inputs for one disassembled build
#[derive(Debug)]
pub struct AnalyzeRequest<'a> {
    pub mode_label: &'a str,
    pub objdump_text: &'a str,
    pub objdump_path: &'a Path,
    pub kernels: &'a [String],
    pub remarks_path: Option<&'a Path>,
    pub kernel_out_dir: &'a Path,
    pub coverage_md: &'a Path,
    pub coverage_json: &'a Path,
    pub remarks_summary_json: &'a Path,
    pub gap_plan_json: &'a Path,
    pub fail_under: Option<usize>,
}

/// Classified rows plus the written coverage payload and gate verdict
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub rows: Vec<ClassificationResult>,
    pub coverage: CoveragePayload,
    pub gate_passed: bool,
}

/// Per-mode build and analysis results, surfaced in the gate aggregate
#[derive(Debug)]
pub struct ModeOutcome {
    pub mode: VectorMode,
    pub elf: PathBuf,
    pub objdump: PathBuf,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
    pub observed_kernels: Option<usize>,
    pub remarks_jsonl: Option<PathBuf>,
    pub coverage_md: PathBuf,
    pub coverage_json: PathBuf,
    pub remarks_summary_json: PathBuf,
    pub gap_plan_json: PathBuf,
    pub coverage: CoveragePayload,
    pub gate_passed: bool,
}

/// What the caller needs to pick an exit code and print the closing line
#[derive(Debug)]
pub struct RunSummary {
    pub selected_mode: VectorMode,
    pub vectorized: usize,
    pub total: usize,
    pub coverage_gate_passed: bool,
    pub checksum: Option<ChecksumComparison>,
    pub checksum_gate_passed: bool,
    pub reports_dir: PathBuf,
}

impl RunSummary {
    #[must_use]
    pub fn all_gates_passed(&self) -> bool {
        self.coverage_gate_passed && self.checksum_gate_passed
    }
}

#[derive(Debug, Serialize)]
struct ProfilePayload {
    iterations: i64,
    len_1d: i64,
    len_2d: i64,
    is_canonical: bool,
}

#[derive(Debug, Serialize)]
struct ExecutablesPayload {
    clang: String,
    lld: String,
    llvm_objdump: String,
    qemu: Option<String>,
}

#[derive(Debug, Serialize)]
struct SelectedArtifactsPayload {
    elf: String,
    objdump: String,
    stdout_log: Option<String>,
    stderr_log: Option<String>,
    coverage_json: String,
    remarks_json: String,
    gap_plan_json: String,
}

#[derive(Debug, Serialize)]
struct GateResultPayload<'a> {
    mode_selected: &'a str,
    vector_modes_run: Vec<&'a str>,
    source_policy: &'a str,
    source_canonicalizations: &'a [crate::stage::AppliedRule],
    profile: ProfilePayload,
    executables: ExecutablesPayload,
    target: &'a str,
    kernel_count: usize,
    strict_fail_under: Option<usize>,
    strict_gate_passed: bool,
    selected_artifacts: SelectedArtifactsPayload,
    coverage: &'a CoveragePayload,
    checksum_compare: Option<&'a ChecksumComparison>,
}

/// Classify every kernel against one disassembly and write the per-mode
/// report set. Reusable directly by the `analyze` subcommand.
pub fn analyze_mode(request: &AnalyzeRequest<'_>) -> Result<AnalysisOutcome> {
    let remarks_by_function = load_remarks(request.remarks_path)?;
    let index = DisasmIndex::parse(request.objdump_text);
    fs::create_dir_all(request.kernel_out_dir)?;

    let mut rows = Vec::with_capacity(request.kernels.len());
    for kernel in request.kernels {
        let (evidence, body) = index.evidence(kernel);
        if let Some(body) = body {
            let path = request.kernel_out_dir.join(format!("{kernel}.objdump.txt"));
            fs::write(path, body)?;
        }
        rows.push(classify_kernel(
            kernel,
            &remarks_by_function,
            &evidence,
            request.mode_label,
        ));
    }

    let inputs = ReportInputs {
        objdump: request.objdump_path.display().to_string(),
        remarks_jsonl: request.remarks_path.map(|p| p.display().to_string()),
        kernel_out_dir: request.kernel_out_dir.display().to_string(),
    };
    let coverage = build_coverage(request.mode_label, &rows, &inputs);
    let gap_plan = build_gap_plan(request.mode_label, &rows);
    let summary = build_remarks_summary(request.mode_label, &rows);

    output::write_json(request.coverage_json, &coverage)?;
    output::write_json(request.remarks_summary_json, &summary)?;
    output::write_json(request.gap_plan_json, &gap_plan)?;
    output::write_text(request.coverage_md, &coverage_markdown(&coverage, &gap_plan))?;

    let gate_passed = coverage_gate_passes(coverage.vectorized, request.fail_under);
    Ok(AnalysisOutcome {
        rows,
        coverage,
        gate_passed,
    })
}

struct OutLayout {
    build_dir: PathBuf,
    stage_dir: PathBuf,
    elf_dir: PathBuf,
    objdump_dir: PathBuf,
    emulator_dir: PathBuf,
    reports_dir: PathBuf,
}

impl OutLayout {
    fn new(out_root: &Path) -> Self {
        let build_dir = out_root.join("build").join("tsvc");
        Self {
            stage_dir: build_dir.join("stage"),
            build_dir,
            elf_dir: out_root.join("elf").join("tsvc"),
            objdump_dir: out_root.join("objdump").join("tsvc"),
            emulator_dir: out_root.join("qemu").join("tsvc"),
            reports_dir: out_root.join("reports").join("tsvc"),
        }
    }
}

fn run_mode(
    config: &PipelineConfig,
    builder: &Builder<'_>,
    layout: &OutLayout,
    suite: &StagedSuite,
    runtime_objs: &[PathBuf],
    mode: VectorMode,
) -> Result<ModeOutcome> {
    let mode_obj_dir = layout.build_dir.join(mode.as_str()).join("obj");
    fs::create_dir_all(&mode_obj_dir)?;

    let remarks_jsonl = if mode.emits_remarks() {
        let path = layout
            .reports_dir
            .join(format!("vectorization_remarks_raw.{}.jsonl", mode.as_str()));
        // The pass appends; stale rows from an earlier run must not leak in.
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Some(path)
    } else {
        None
    };

    let mut include_dirs = config.include_dirs.clone();
    include_dirs.push(suite.stage_dir.clone());

    // Only the kernel translation unit gets the mode under audit; the
    // driver and dummy objects stay scalar in every mode.
    let tsvc_obj = mode_obj_dir.join("tsvc.o");
    let common_obj = mode_obj_dir.join("common.o");
    let dummy_obj = mode_obj_dir.join("dummy.o");
    builder.compile_object(
        &suite.stage_dir.join("tsvc.c"),
        &tsvc_obj,
        &include_dirs,
        &compile_flags(mode, remarks_jsonl.as_deref()),
    )?;
    let scalar_flags = compile_flags(VectorMode::Off, None);
    builder.compile_object(
        &suite.stage_dir.join("common.c"),
        &common_obj,
        &include_dirs,
        &scalar_flags,
    )?;
    builder.compile_object(
        &suite.stage_dir.join("dummy.c"),
        &dummy_obj,
        &include_dirs,
        &scalar_flags,
    )?;

    let elf = layout.elf_dir.join(format!("tsvc.{}.elf", mode.as_str()));
    let mut objs: Vec<PathBuf> = runtime_objs.to_vec();
    objs.extend([tsvc_obj, common_obj, dummy_obj]);
    builder.link_elf(&elf, &objs)?;

    let objdump = layout
        .objdump_dir
        .join(format!("tsvc.{}.objdump.txt", mode.as_str()));
    let objdump_text = builder.disassemble(&elf, &objdump)?;

    let mut stdout_log = None;
    let mut stderr_log = None;
    let mut observed_kernels = None;
    if config.run_emulator {
        let out_log = layout
            .emulator_dir
            .join(format!("tsvc.{}.stdout.txt", mode.as_str()));
        let err_log = layout
            .emulator_dir
            .join(format!("tsvc.{}.stderr.txt", mode.as_str()));
        let stdout_text =
            builder.run_emulator(&elf, &out_log, &err_log, config.emulator_timeout)?;
        verify_run_output(&stdout_text, mode, &out_log)?;

        let checksums = parse_kernel_checksums(&stdout_text, &suite.kernels);
        let missing: Vec<&String> = suite
            .kernels
            .iter()
            .filter(|k| !checksums.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            let preview: Vec<&str> =
                missing.iter().take(8).map(|k| k.as_str()).collect();
            return Err(AuditError::tool(
                "emulator",
                format!(
                    "missing kernels ({}): {}\n  missing sample: {}\n  stdout: {}",
                    mode.as_str(),
                    missing.len(),
                    preview.join(", "),
                    out_log.display()
                ),
            ));
        }
        observed_kernels = Some(checksums.len());
        stdout_log = Some(out_log);
        stderr_log = Some(err_log);
    }

    let coverage_md = layout
        .reports_dir
        .join(format!("vectorization_coverage.{}.md", mode.as_str()));
    let coverage_json = layout
        .reports_dir
        .join(format!("vectorization_coverage.{}.json", mode.as_str()));
    let remarks_summary_json = layout
        .reports_dir
        .join(format!("vectorization_remarks.{}.json", mode.as_str()));
    let gap_plan_json = layout
        .reports_dir
        .join(format!("vectorization_gap_plan.{}.json", mode.as_str()));
    let kernel_out_dir = layout.objdump_dir.join("kernels").join(mode.as_str());

    // The scalar baseline is exempt from the strict gate; its analysis is
    // evidence that the pass stayed off.
    let fail_under = if mode == VectorMode::Off {
        None
    } else {
        config.strict_fail_under
    };
    let analysis = analyze_mode(&AnalyzeRequest {
        mode_label: mode.as_str(),
        objdump_text: &objdump_text,
        objdump_path: &objdump,
        kernels: &suite.kernels,
        remarks_path: remarks_jsonl.as_deref(),
        kernel_out_dir: &kernel_out_dir,
        coverage_md: &coverage_md,
        coverage_json: &coverage_json,
        remarks_summary_json: &remarks_summary_json,
        gap_plan_json: &gap_plan_json,
        fail_under,
    })?;

    Ok(ModeOutcome {
        mode,
        elf,
        objdump,
        stdout_log,
        stderr_log,
        observed_kernels,
        remarks_jsonl,
        coverage_md,
        coverage_json,
        remarks_summary_json,
        gap_plan_json,
        coverage: analysis.coverage,
        gate_passed: analysis.gate_passed,
    })
}

fn mirror_selected_reports(layout: &OutLayout, selected: &ModeOutcome) -> Result<()> {
    let mirrors = [
        (&selected.coverage_md, "vectorization_coverage.md"),
        (&selected.coverage_json, "vectorization_coverage.json"),
        (&selected.remarks_summary_json, "vectorization_remarks.json"),
        (&selected.gap_plan_json, "vectorization_gap_plan.json"),
    ];
    for (src, name) in mirrors {
        fs::copy(src, layout.reports_dir.join(name))?;
    }
    if let Some(remarks) = &selected.remarks_jsonl {
        if remarks.exists() {
            fs::copy(remarks, layout.reports_dir.join("vectorization_remarks_raw.jsonl"))?;
        }
    }
    Ok(())
}

fn compare_selected_checksums(
    config: &PipelineConfig,
    layout: &OutLayout,
    suite: &StagedSuite,
    selected: &ModeOutcome,
    baseline_log: &Path,
) -> Result<(ChecksumComparison, PathBuf)> {
    let candidate_log = selected.stdout_log.as_ref().ok_or_else(|| {
        AuditError::config("checksum comparison requires emulator execution")
    })?;
    let baseline_text = fs::read_to_string(baseline_log).map_err(|_| {
        AuditError::config(format!(
            "baseline log not found: {}",
            baseline_log.display()
        ))
    })?;
    let candidate_text = fs::read_to_string(candidate_log)?;

    let mut comparison =
        checksum::compare_logs(&baseline_text, &candidate_text, Some(&suite.kernels));
    comparison.baseline = baseline_log.display().to_string();
    comparison.candidate = candidate_log.display().to_string();
    comparison.kernel_list = Some(layout.reports_dir.join("kernel_list.txt").display().to_string());

    let json_path = config.checksum_report_json.clone().unwrap_or_else(|| {
        layout
            .reports_dir
            .join(format!("checksum_compare.{}.json", selected.mode.as_str()))
    });
    let md_path = json_path.with_extension("md");
    output::write_json(&json_path, &comparison)?;
    output::write_text(&md_path, &checksum::comparison_markdown(&comparison))?;
    Ok((comparison, json_path))
}

fn summary_markdown(
    config: &PipelineConfig,
    layout: &OutLayout,
    suite: &StagedSuite,
    outcomes: &[ModeOutcome],
    selected: &ModeOutcome,
    checksum: Option<&ChecksumComparison>,
) -> String {
    let mode_list: Vec<&str> = outcomes.iter().map(|o| o.mode.as_str()).collect();
    let mut lines = vec![
        "# TSVC auto-vectorization report".to_string(),
        String::new(),
        format!("- Source: `{}`", config.tsvc_src.display()),
        format!("- Source policy: `{}`", config.stage.source_policy.as_str()),
        format!(
            "- Profile: `iterations={}`, `LEN_1D={}`, `LEN_2D={}`",
            config.stage.iterations, config.stage.len_1d, config.stage.len_2d
        ),
        format!(
            "- Canonical profile: `{}`",
            if config.stage.is_canonical() { "yes" } else { "no" }
        ),
        format!("- Modes run: `{}`", mode_list.join(", ")),
        format!(
            "- Emulator executed: `{}`",
            if config.run_emulator { "yes" } else { "no" }
        ),
        String::new(),
        "## Mode artifacts".to_string(),
    ];
    for outcome in outcomes {
        let emulator_status = match outcome.observed_kernels {
            Some(observed) => format!("{observed}/{} kernels", suite.kernels.len()),
            None => "skipped".to_string(),
        };
        lines.push(format!(
            "- `{}`: strict vectorized `{}/{}`, emulator `{}`, objdump `{}`",
            outcome.mode.as_str(),
            outcome.coverage.vectorized,
            suite.kernels.len(),
            emulator_status,
            outcome.objdump.display()
        ));
    }
    lines.extend([
        String::new(),
        "## Selected mode outputs".to_string(),
        format!(
            "- Coverage: `{}`",
            layout.reports_dir.join("vectorization_coverage.md").display()
        ),
        format!(
            "- Coverage JSON: `{}`",
            layout.reports_dir.join("vectorization_coverage.json").display()
        ),
        format!(
            "- Remarks JSON: `{}`",
            layout.reports_dir.join("vectorization_remarks.json").display()
        ),
        format!(
            "- Gap plan JSON: `{}`",
            layout.reports_dir.join("vectorization_gap_plan.json").display()
        ),
        format!(
            "- Gate JSON: `{}`",
            layout.reports_dir.join("gate_result.json").display()
        ),
        format!(
            "- Kernel objdumps: `{}`",
            layout
                .objdump_dir
                .join("kernels")
                .join(selected.mode.as_str())
                .display()
        ),
    ]);
    if let (Some(stdout_log), Some(stderr_log)) = (&selected.stdout_log, &selected.stderr_log) {
        lines.push(format!("- Emulator stdout: `{}`", stdout_log.display()));
        lines.push(format!("- Emulator stderr: `{}`", stderr_log.display()));
    }
    if let Some(comparison) = checksum {
        lines.push(format!(
            "- Checksum mismatches: `{}`",
            comparison.checksum_mismatch_count
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Run the whole audit. Gate failures are reported in the summary, never as
/// errors: every artifact is written even when a gate fails.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunSummary> {
    if config.modes.is_empty() {
        return Err(AuditError::config("no vector modes configured"));
    }
    if config.compare_baseline_log.is_some() && !config.run_emulator {
        return Err(AuditError::config(
            "checksum comparison requires emulator execution",
        ));
    }
    let toolchain = Toolchain::resolve(&config.toolchain, config.run_emulator)?;
    let builder = Builder::new(&toolchain, config.target.clone(), config.verbose);

    let layout = OutLayout::new(&config.out_dir);
    for dir in [
        &layout.build_dir,
        &layout.elf_dir,
        &layout.objdump_dir,
        &layout.emulator_dir,
        &layout.reports_dir,
    ] {
        fs::create_dir_all(dir)?;
    }

    let suite = stage_suite(&config.tsvc_src, &layout.stage_dir, &config.stage)?;
    output::write_text(
        &layout.reports_dir.join("kernel_list.txt"),
        &(suite.kernels.join("\n") + "\n"),
    )?;

    let mut runtime_includes = config.include_dirs.clone();
    runtime_includes.push(suite.stage_dir.clone());
    let runtime_objs = builder.build_runtime_objects(
        config.runtime_dir.as_deref(),
        &runtime_includes,
        &layout.build_dir,
    )?;

    let mut outcomes = Vec::with_capacity(config.modes.len());
    for mode in &config.modes {
        outcomes.push(run_mode(
            config,
            &builder,
            &layout,
            &suite,
            &runtime_objs,
            *mode,
        )?);
    }

    let selected_index = outcomes
        .iter()
        .position(|o| o.mode == VectorMode::Auto)
        .unwrap_or(outcomes.len() - 1);
    let selected = &outcomes[selected_index];
    mirror_selected_reports(&layout, selected)?;

    let mut checksum_comparison = None;
    let mut checksum_gate_passed = true;
    if let Some(baseline_log) = &config.compare_baseline_log {
        let (comparison, _json_path) =
            compare_selected_checksums(config, &layout, &suite, selected, baseline_log)?;
        if config.fail_on_checksum_mismatch && !comparison.ok {
            checksum_gate_passed = false;
        }
        checksum_comparison = Some(comparison);
    }

    let coverage_gate_passed = outcomes.iter().all(|o| o.gate_passed);
    let gate_payload = GateResultPayload {
        mode_selected: selected.mode.as_str(),
        vector_modes_run: outcomes.iter().map(|o| o.mode.as_str()).collect(),
        source_policy: config.stage.source_policy.as_str(),
        source_canonicalizations: &suite.canonicalizations,
        profile: ProfilePayload {
            iterations: config.stage.iterations,
            len_1d: config.stage.len_1d,
            len_2d: config.stage.len_2d,
            is_canonical: config.stage.is_canonical(),
        },
        executables: ExecutablesPayload {
            clang: toolchain.clang.display().to_string(),
            lld: toolchain.lld.display().to_string(),
            llvm_objdump: toolchain.llvm_objdump.display().to_string(),
            qemu: toolchain.qemu.as_ref().map(|p| p.display().to_string()),
        },
        target: &config.target,
        kernel_count: suite.kernels.len(),
        strict_fail_under: config.strict_fail_under,
        strict_gate_passed: coverage_gate_passed,
        selected_artifacts: SelectedArtifactsPayload {
            elf: selected.elf.display().to_string(),
            objdump: selected.objdump.display().to_string(),
            stdout_log: selected.stdout_log.as_ref().map(|p| p.display().to_string()),
            stderr_log: selected.stderr_log.as_ref().map(|p| p.display().to_string()),
            coverage_json: selected.coverage_json.display().to_string(),
            remarks_json: selected.remarks_summary_json.display().to_string(),
            gap_plan_json: selected.gap_plan_json.display().to_string(),
        },
        coverage: &selected.coverage,
        checksum_compare: checksum_comparison.as_ref(),
    };
    let gate_json_mode = layout
        .reports_dir
        .join(format!("gate_result.{}.json", selected.mode.as_str()));
    output::write_json(&gate_json_mode, &gate_payload)?;
    fs::copy(&gate_json_mode, layout.reports_dir.join("gate_result.json"))?;

    let summary = summary_markdown(
        config,
        &layout,
        &suite,
        &outcomes,
        selected,
        checksum_comparison.as_ref(),
    );
    output::write_text(&config.out_dir.join("tsvc_report.md"), &summary)?;

    Ok(RunSummary {
        selected_mode: selected.mode,
        vectorized: selected.coverage.vectorized,
        total: selected.coverage.total,
        coverage_gate_passed,
        checksum: checksum_comparison,
        checksum_gate_passed,
        reports_dir: layout.reports_dir,
    })
}
