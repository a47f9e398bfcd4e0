//! vecgate CLI
//!
//! Three entry points mirroring the audit workflow: `run` drives the whole
//! build/emulate/analyze pipeline, `analyze` re-runs classification over an
//! existing disassembly, and `compare-checksums` checks two emulator logs
//! for parity. Gate failures exit 2; fatal errors print `error: ...` and
//! exit 1.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use vecgate::driver::VectorMode;
use vecgate::output;
use vecgate::pipeline::{analyze_mode, run_pipeline, AnalyzeRequest, PipelineConfig};
use vecgate::stage::{SourcePolicy, StageOptions};
use vecgate::toolchain::ToolchainSpec;
use vecgate::{checksum, report};

#[derive(Parser)]
#[command(name = "vecgate")]
#[command(author, version, about = "Strict auto-vectorization coverage auditor")]
#[command(long_about = "
Builds the TSVC loop suite per vectorization mode, runs it under an
emulator, and credits a kernel as vectorized only when compiler remarks
and disassembly evidence agree. Non-vectorized kernels are sorted into a
fixed gap-bucket taxonomy with suggested next actions.
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, emulate, analyze, and gate every configured vector mode
    Run {
        /// Path to clang (env: CLANG)
        #[arg(long)]
        clang: Option<PathBuf>,

        /// Path to ld.lld (default: clang sibling)
        #[arg(long)]
        lld: Option<PathBuf>,

        /// Path to llvm-objdump (default: clang sibling)
        #[arg(long)]
        llvm_objdump: Option<PathBuf>,

        /// Path to the system emulator (env: QEMU)
        #[arg(long)]
        qemu: Option<PathBuf>,

        /// Target triple
        #[arg(long, default_value = "linx64-linx-none-elf")]
        target: String,

        /// TSVC source directory (expects common.h + tsvc.c)
        #[arg(long)]
        tsvc_src: PathBuf,

        /// Directory of freestanding runtime C sources linked into every ELF
        #[arg(long)]
        runtime_dir: Option<PathBuf>,

        /// Extra include directories
        #[arg(long = "include-dir")]
        include_dirs: Vec<PathBuf>,

        /// Outer iteration count baked into the staged suite
        #[arg(long, default_value_t = 32)]
        iterations: i64,

        /// 1-D array length (must be a multiple of 40)
        #[arg(long, default_value_t = 320)]
        len_1d: i64,

        /// 2-D array length
        #[arg(long, default_value_t = 16)]
        len_2d: i64,

        /// Build mode (`all` runs off+mseq+mpar+auto)
        #[arg(long, default_value = "auto")]
        vector_mode: String,

        /// Only run kernels matching this regex
        #[arg(long)]
        kernel_regex: Option<String>,

        /// Staged source policy for parity gates
        #[arg(long, default_value = "linx-v03-parity")]
        source_policy: String,

        /// Skip emulation (compile+objdump+analysis only)
        #[arg(long)]
        no_run: bool,

        /// Emulator timeout in seconds
        #[arg(long, default_value_t = 240.0)]
        emulator_timeout: f64,

        /// Fail when strict vectorized kernels fall below this count
        #[arg(long)]
        strict_fail_under: Option<usize>,

        /// Baseline emulator stdout log for checksum comparison
        #[arg(long)]
        compare_baseline_log: Option<PathBuf>,

        /// Checksum comparison JSON output path
        #[arg(long)]
        checksum_report_json: Option<PathBuf>,

        /// Fail when the checksum comparison finds missing kernels or mismatches
        #[arg(long)]
        fail_on_checksum_mismatch: bool,

        /// Generated artifacts root
        #[arg(long, default_value = "generated")]
        out_dir: PathBuf,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Classify kernels from an existing disassembly and remark log
    Analyze {
        /// Disassembly text file
        #[arg(long)]
        objdump: PathBuf,

        /// Kernel list file, one kernel per line
        #[arg(long)]
        kernel_list: PathBuf,

        /// Directory for per-kernel reachable-body files
        #[arg(long)]
        kernel_out_dir: PathBuf,

        /// Markdown report output path
        #[arg(long)]
        report: PathBuf,

        /// Coverage JSON output path
        #[arg(long)]
        json_out: PathBuf,

        /// Per-kernel detail JSON output path
        #[arg(long)]
        remarks_summary_out: PathBuf,

        /// Gap plan JSON output path
        #[arg(long)]
        gap_plan_out: PathBuf,

        /// Remark JSONL emitted by the compiler pass
        #[arg(long)]
        remarks_jsonl: Option<PathBuf>,

        /// Mode label recorded in the payloads
        #[arg(long, default_value = "auto")]
        mode: String,

        /// Fail when strict vectorized kernels fall below this count
        #[arg(long)]
        fail_under: Option<usize>,
    },

    /// Compare per-kernel checksum rows of two emulator stdout logs
    CompareChecksums {
        /// Baseline stdout log path
        #[arg(long)]
        baseline: PathBuf,

        /// Candidate stdout log path
        #[arg(long)]
        candidate: PathBuf,

        /// Optional kernel-list file to constrain comparisons
        #[arg(long)]
        kernel_list: Option<PathBuf>,

        /// Optional JSON output path
        #[arg(long)]
        json_out: Option<PathBuf>,

        /// Optional markdown report output path
        #[arg(long)]
        report_out: Option<PathBuf>,

        /// Exit non-zero on missing kernels or checksum mismatches
        #[arg(long)]
        fail_on_mismatch: bool,
    },
}

fn parse_modes(tag: &str) -> Result<Vec<VectorMode>> {
    if tag == "all" {
        return Ok(VectorMode::ALL.to_vec());
    }
    Ok(vec![tag.parse()?])
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    toolchain: ToolchainSpec,
    target: String,
    tsvc_src: PathBuf,
    runtime_dir: Option<PathBuf>,
    include_dirs: Vec<PathBuf>,
    stage: StageOptions,
    vector_mode: &str,
    no_run: bool,
    emulator_timeout: f64,
    strict_fail_under: Option<usize>,
    compare_baseline_log: Option<PathBuf>,
    checksum_report_json: Option<PathBuf>,
    fail_on_checksum_mismatch: bool,
    out_dir: PathBuf,
    verbose: bool,
) -> Result<ExitCode> {
    let config = PipelineConfig {
        toolchain,
        target,
        tsvc_src,
        runtime_dir,
        include_dirs,
        stage,
        modes: parse_modes(vector_mode)?,
        run_emulator: !no_run,
        emulator_timeout,
        strict_fail_under,
        compare_baseline_log,
        checksum_report_json,
        fail_on_checksum_mismatch,
        out_dir,
        verbose,
    };
    let summary = run_pipeline(&config)?;

    if !summary.coverage_gate_passed {
        output::print_error(&format!(
            "strict coverage gate failed ({}/{} vectorized) [{}]",
            summary.vectorized,
            summary.total,
            output::gate_tag(false)
        ));
        return Ok(ExitCode::from(2));
    }
    if !summary.checksum_gate_passed {
        let mismatches = summary
            .checksum
            .as_ref()
            .map_or(0, |c| c.checksum_mismatch_count);
        output::print_error(&format!(
            "checksum comparison failed (mismatches={mismatches}) [{}]",
            output::gate_tag(false)
        ));
        return Ok(ExitCode::from(2));
    }
    output::print_ok(&format!(
        "{} strict coverage {}/{} -> {} [{}]",
        summary.selected_mode.as_str(),
        summary.vectorized,
        summary.total,
        summary.reports_dir.display(),
        output::gate_tag(true)
    ));
    Ok(ExitCode::SUCCESS)
}

#[allow(clippy::too_many_arguments)]
fn cmd_analyze(
    objdump: &PathBuf,
    kernel_list: &PathBuf,
    kernel_out_dir: &PathBuf,
    report_path: &PathBuf,
    json_out: &PathBuf,
    remarks_summary_out: &PathBuf,
    gap_plan_out: &PathBuf,
    remarks_jsonl: Option<&PathBuf>,
    mode: &str,
    fail_under: Option<usize>,
) -> Result<ExitCode> {
    let kernels = report::read_kernel_list(kernel_list)?;
    let objdump_text = fs::read_to_string(objdump)
        .with_context(|| format!("objdump not found: {}", objdump.display()))?;

    let outcome = analyze_mode(&AnalyzeRequest {
        mode_label: mode,
        objdump_text: &objdump_text,
        objdump_path: objdump,
        kernels: &kernels,
        remarks_path: remarks_jsonl.map(PathBuf::as_path),
        kernel_out_dir,
        coverage_md: report_path,
        coverage_json: json_out,
        remarks_summary_json: remarks_summary_out,
        gap_plan_json: gap_plan_out,
        fail_under,
    })?;

    if !outcome.gate_passed {
        output::print_error(&format!(
            "strict coverage gate failed ({} < {})",
            outcome.coverage.vectorized,
            fail_under.unwrap_or(0)
        ));
        return Ok(ExitCode::from(2));
    }
    output::print_ok(&format!(
        "strict coverage {}/{} ({:.2}%) -> {}",
        outcome.coverage.vectorized,
        outcome.coverage.total,
        outcome.coverage.coverage_percent,
        report_path.display()
    ));
    Ok(ExitCode::SUCCESS)
}

fn cmd_compare_checksums(
    baseline: &PathBuf,
    candidate: &PathBuf,
    kernel_list: Option<&PathBuf>,
    json_out: Option<&PathBuf>,
    report_out: Option<&PathBuf>,
    fail_on_mismatch: bool,
) -> Result<ExitCode> {
    let baseline_text = fs::read_to_string(baseline)
        .with_context(|| format!("baseline log not found: {}", baseline.display()))?;
    let candidate_text = fs::read_to_string(candidate)
        .with_context(|| format!("candidate log not found: {}", candidate.display()))?;
    let kernel_filter = kernel_list
        .map(|path| report::read_kernel_list(path))
        .transpose()?;

    let mut comparison = checksum::compare_logs(
        &baseline_text,
        &candidate_text,
        kernel_filter.as_deref(),
    );
    comparison.baseline = baseline.display().to_string();
    comparison.candidate = candidate.display().to_string();
    comparison.kernel_list = kernel_list.map(|p| p.display().to_string());

    if let Some(path) = json_out {
        output::write_json(path, &comparison)?;
    }
    if let Some(path) = report_out {
        output::write_text(path, &checksum::comparison_markdown(&comparison))?;
    }

    if fail_on_mismatch && !comparison.ok {
        output::print_error(&format!(
            "checksum comparison failed (missing_baseline={} missing_candidate={} mismatches={})",
            comparison.missing_in_baseline.len(),
            comparison.missing_in_candidate.len(),
            comparison.checksum_mismatch_count
        ));
        return Ok(ExitCode::from(2));
    }
    output::print_ok(&format!(
        "checksum comparison kernels={} mismatches={}",
        comparison.kernels_compared, comparison.checksum_mismatch_count
    ));
    Ok(ExitCode::SUCCESS)
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            clang,
            lld,
            llvm_objdump,
            qemu,
            target,
            tsvc_src,
            runtime_dir,
            include_dirs,
            iterations,
            len_1d,
            len_2d,
            vector_mode,
            kernel_regex,
            source_policy,
            no_run,
            emulator_timeout,
            strict_fail_under,
            compare_baseline_log,
            checksum_report_json,
            fail_on_checksum_mismatch,
            out_dir,
            verbose,
        } => {
            let stage = StageOptions {
                iterations,
                len_1d,
                len_2d,
                kernel_regex,
                source_policy: source_policy.parse::<SourcePolicy>()?,
            };
            cmd_run(
                ToolchainSpec {
                    clang,
                    lld,
                    llvm_objdump,
                    qemu,
                },
                target,
                tsvc_src,
                runtime_dir,
                include_dirs,
                stage,
                &vector_mode,
                no_run,
                emulator_timeout,
                strict_fail_under,
                compare_baseline_log,
                checksum_report_json,
                fail_on_checksum_mismatch,
                out_dir,
                verbose,
            )
        }
        Commands::Analyze {
            objdump,
            kernel_list,
            kernel_out_dir,
            report,
            json_out,
            remarks_summary_out,
            gap_plan_out,
            remarks_jsonl,
            mode,
            fail_under,
        } => cmd_analyze(
            &objdump,
            &kernel_list,
            &kernel_out_dir,
            &report,
            &json_out,
            &remarks_summary_out,
            &gap_plan_out,
            remarks_jsonl.as_ref(),
            &mode,
            fail_under,
        ),
        Commands::CompareChecksums {
            baseline,
            candidate,
            kernel_list,
            json_out,
            report_out,
            fail_on_mismatch,
        } => cmd_compare_checksums(
            &baseline,
            &candidate,
            kernel_list.as_ref(),
            json_out.as_ref(),
            report_out.as_ref(),
            fail_on_mismatch,
        ),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
