//! Integration tests for the vecgate binary
//!
//! Exercises the `analyze` and `compare-checksums` subcommands end to end
//! through the compiled CLI, using synthetic disassembly and remark streams.
//! The `run` subcommand needs a cross toolchain and is covered by unit tests
//! against fake executables instead.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run the vecgate binary
fn run_vecgate(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_vecgate"))
        .args(args)
        .output()
        .expect("Failed to run vecgate")
}

/// Two-kernel disassembly: s2111 carries a memory vector header, a bare
/// `b.text` branch into a local vector body, and vector instructions in the
/// reachable closure; s176 is purely scalar.
const OBJDUMP_FIXTURE: &str = "\
0000000000001000 <s2111>:
    1000: 01 02    bstart.mseq x1, x2
    1004: 02 03    b.text s2111_body
    1008: 00 00    bstop

0000000000001100 <s2111_body>:
    1100: 0a 0b    v.add v0, v1, v2
    1104: 0c 0d    v.store v0, [x3]

0000000000001200 <s176>:
    1200: 01 00    addi x1, x1, -16
    1204: 02 00    ret
";

struct AnalyzeFixture {
    dir: TempDir,
}

impl AnalyzeFixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("tsvc.objdump.txt"), OBJDUMP_FIXTURE).unwrap();
        fs::write(dir.path().join("kernel_list.txt"), "s2111\ns176\n").unwrap();
        fs::write(
            dir.path().join("remarks.jsonl"),
            concat!(
                r#"{"function": "s2111", "status": "lowered", "reason": "lowered_vblock_memseq", "touches_memory": true, "lane_count": 4, "selected_mode": "mseq"}"#,
                "\n",
                "garbage line that is not json\n",
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }

    fn analyze_args(&self, extra: &[&str]) -> Vec<String> {
        let mut args = vec![
            "analyze".to_string(),
            "--objdump".to_string(),
            self.path("tsvc.objdump.txt"),
            "--kernel-list".to_string(),
            self.path("kernel_list.txt"),
            "--kernel-out-dir".to_string(),
            self.path("kernels"),
            "--report".to_string(),
            self.path("coverage.md"),
            "--json-out".to_string(),
            self.path("coverage.json"),
            "--remarks-summary-out".to_string(),
            self.path("remarks_summary.json"),
            "--gap-plan-out".to_string(),
            self.path("gap_plan.json"),
            "--remarks-jsonl".to_string(),
            self.path("remarks.jsonl"),
        ];
        args.extend(extra.iter().map(ToString::to_string));
        args
    }

    fn read_json(&self, name: &str) -> serde_json::Value {
        let text = fs::read_to_string(self.dir.path().join(name)).unwrap();
        serde_json::from_str(&text).expect("valid JSON artifact")
    }
}

/// `vecgate --help` lists all three subcommands
#[test]
fn help_shows_subcommands() {
    let output = run_vecgate(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Help should succeed");
    assert!(stdout.contains("run"), "Should show run subcommand");
    assert!(stdout.contains("analyze"), "Should show analyze subcommand");
    assert!(
        stdout.contains("compare-checksums"),
        "Should show compare-checksums subcommand"
    );
}

/// `vecgate analyze --help` lists the artifact flags
#[test]
fn analyze_help_shows_options() {
    let output = run_vecgate(&["analyze", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Analyze help should succeed");
    assert!(stdout.contains("--objdump"), "Should show --objdump");
    assert!(stdout.contains("--kernel-list"), "Should show --kernel-list");
    assert!(stdout.contains("--remarks-jsonl"), "Should show --remarks-jsonl");
    assert!(stdout.contains("--fail-under"), "Should show --fail-under");
}

/// Full analyze pass: one strict kernel, one scalar kernel, exit 0
#[test]
fn analyze_classifies_strict_and_scalar() {
    let fixture = AnalyzeFixture::new();
    let args = fixture.analyze_args(&["--mode", "mseq"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_vecgate(&arg_refs);

    assert!(
        output.status.success(),
        "analyze should exit 0, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let coverage = fixture.read_json("coverage.json");
    assert_eq!(coverage["mode"], "mseq");
    assert_eq!(coverage["total"], 2);
    assert_eq!(coverage["vectorized"], 1);
    assert_eq!(coverage["non_vectorized"], 1);
    assert_eq!(coverage["coverage_percent"], 50.0);
    assert_eq!(coverage["vectorized_kernels"][0], "s2111");
    assert_eq!(coverage["non_vectorized_kernels"][0], "s176");
}

/// Per-kernel detail rows carry the strict verdict and remark fields
#[test]
fn analyze_remarks_summary_rows() {
    let fixture = AnalyzeFixture::new();
    let args = fixture.analyze_args(&["--mode", "mseq"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_vecgate(&arg_refs);
    assert!(output.status.success());

    let summary = fixture.read_json("remarks_summary.json");
    assert_eq!(summary["total_kernels"], 2);
    assert_eq!(summary["strict_vectorized_kernels"], 1);

    let rows = summary["rows"].as_array().expect("rows array");
    let s2111 = rows
        .iter()
        .find(|r| r["kernel"] == "s2111")
        .expect("s2111 row");
    assert_eq!(s2111["strict_vectorized"], true);
    assert_eq!(s2111["status"], "lowered");
    assert_eq!(s2111["reason"], "lowered_vblock_memseq");
    assert_eq!(s2111["lane_count"], 4);
    assert_eq!(s2111["asm_has_mem_header"], true);
    assert_eq!(s2111["asm_has_vec_insn"], true);
    assert_eq!(s2111["asm_has_btext"], true);

    let s176 = rows
        .iter()
        .find(|r| r["kernel"] == "s176")
        .expect("s176 row");
    assert_eq!(s176["strict_vectorized"], false);
    assert_eq!(s176["reason"], "no_remarks_for_kernel");
}

/// Remark-less kernels land in the `other` gap bucket with manual triage
#[test]
fn analyze_gap_plan_buckets() {
    let fixture = AnalyzeFixture::new();
    let args = fixture.analyze_args(&[]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_vecgate(&arg_refs);
    assert!(output.status.success());

    let plan = fixture.read_json("gap_plan.json");
    assert_eq!(plan["bucket_counts"]["other"], 1);

    let names = plan["buckets"]["other"].as_array().expect("other bucket");
    assert_eq!(names.len(), 1);
    assert_eq!(names[0], "s176");

    let entries = plan["kernel_plan"].as_array().expect("kernel plan");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kernel"], "s176");
    assert_eq!(entries[0]["bucket"], "other");
    assert_eq!(entries[0]["next_action"], "manual_triage");
}

/// Reachable-closure body files are written per kernel
#[test]
fn analyze_writes_kernel_bodies() {
    let fixture = AnalyzeFixture::new();
    let args = fixture.analyze_args(&[]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_vecgate(&arg_refs);
    assert!(output.status.success());

    let body =
        fs::read_to_string(fixture.dir.path().join("kernels/s2111.objdump.txt")).unwrap();
    assert!(body.contains("bstart.mseq"), "root body in closure");
    assert!(body.contains("v.add"), "branch target body in closure");

    let report = fs::read_to_string(fixture.dir.path().join("coverage.md")).unwrap();
    assert!(report.contains("# TSVC strict auto-vectorization coverage"));
    assert!(report.contains("## Gap buckets"));
    assert!(report.contains("- `s176`"), "non-vectorized kernel listed");
}

/// `--fail-under` above the strict count exits 2, artifacts still written
#[test]
fn analyze_fail_under_gate() {
    let fixture = AnalyzeFixture::new();
    let args = fixture.analyze_args(&["--fail-under", "2"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_vecgate(&arg_refs);

    assert_eq!(output.status.code(), Some(2), "gate failure exits 2");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "gate failure reported on stderr");
    assert!(
        fixture.dir.path().join("coverage.json").exists(),
        "reports written before the gate"
    );
}

/// A `--fail-under` the run satisfies exits 0
#[test]
fn analyze_fail_under_satisfied() {
    let fixture = AnalyzeFixture::new();
    let args = fixture.analyze_args(&["--fail-under", "1"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_vecgate(&arg_refs);

    assert!(output.status.success());
}

/// Missing disassembly is a fatal error, exit 1
#[test]
fn analyze_missing_objdump_is_fatal() {
    let fixture = AnalyzeFixture::new();
    let mut args = fixture.analyze_args(&[]);
    args[2] = fixture.path("does_not_exist.txt");
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_vecgate(&arg_refs);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "fatal errors print error: prefix");
}

/// An empty kernel list is a fatal precondition
#[test]
fn analyze_empty_kernel_list_is_fatal() {
    let fixture = AnalyzeFixture::new();
    fs::write(fixture.dir.path().join("kernel_list.txt"), "# only comments\n\n").unwrap();
    let args = fixture.analyze_args(&[]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_vecgate(&arg_refs);

    assert_eq!(output.status.code(), Some(1));
}

fn write_logs(dir: &Path, baseline: &str, candidate: &str) -> (String, String) {
    let base = dir.join("baseline.txt");
    let cand = dir.join("candidate.txt");
    fs::write(&base, baseline).unwrap();
    fs::write(&cand, candidate).unwrap();
    (base.display().to_string(), cand.display().to_string())
}

/// Matching logs compare clean and exit 0
#[test]
fn compare_checksums_matching_logs() {
    let dir = TempDir::new().unwrap();
    let log = "Loop \t Time \t Checksum\ns000\t0.125\t0x1a2b3c4d\ns2111\t0.250\t0xcafecafe\n";
    let (base, cand) = write_logs(dir.path(), log, log);
    let json_out = dir.path().join("compare.json").display().to_string();

    let output = run_vecgate(&[
        "compare-checksums",
        "--baseline",
        &base,
        "--candidate",
        &cand,
        "--json-out",
        &json_out,
        "--fail-on-mismatch",
    ]);

    assert!(output.status.success());
    let text = fs::read_to_string(dir.path().join("compare.json")).unwrap();
    let payload: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["kernels_compared"], 2);
    assert_eq!(payload["checksum_mismatch_count"], 0);
}

/// A checksum divergence exits 2 under --fail-on-mismatch
#[test]
fn compare_checksums_mismatch_gates() {
    let dir = TempDir::new().unwrap();
    let (base, cand) = write_logs(
        dir.path(),
        "s000\t0.125\t0x11111111\n",
        "s000\t0.200\t0x22222222\n",
    );
    let report_out = dir.path().join("compare.md").display().to_string();

    let output = run_vecgate(&[
        "compare-checksums",
        "--baseline",
        &base,
        "--candidate",
        &cand,
        "--report-out",
        &report_out,
        "--fail-on-mismatch",
    ]);

    assert_eq!(output.status.code(), Some(2), "mismatch gates exit 2");
    let report = fs::read_to_string(dir.path().join("compare.md")).unwrap();
    assert!(report.contains("FAIL"));
    assert!(report.contains("0x11111111"));
    assert!(report.contains("0x22222222"));
}

/// Without --fail-on-mismatch a divergence is reported but not gated
#[test]
fn compare_checksums_mismatch_without_gate() {
    let dir = TempDir::new().unwrap();
    let (base, cand) = write_logs(
        dir.path(),
        "s000\t0.125\t0x11111111\n",
        "s000\t0.200\t0x22222222\n",
    );

    let output = run_vecgate(&[
        "compare-checksums",
        "--baseline",
        &base,
        "--candidate",
        &cand,
    ]);

    assert!(output.status.success(), "no gate flag means exit 0");
}

/// A kernel-list filter constrains the compared set
#[test]
fn compare_checksums_kernel_list_filter() {
    let dir = TempDir::new().unwrap();
    let (base, cand) = write_logs(
        dir.path(),
        "s000\t0.1\t0xaaaaaaaa\ns176\t0.2\t0xbbbbbbbb\n",
        "s000\t0.1\t0xaaaaaaaa\ns176\t0.2\t0xdeadbeef\n",
    );
    let list = dir.path().join("kernels.txt");
    fs::write(&list, "s000\n").unwrap();
    let list = list.display().to_string();
    let json_out = dir.path().join("compare.json").display().to_string();

    let output = run_vecgate(&[
        "compare-checksums",
        "--baseline",
        &base,
        "--candidate",
        &cand,
        "--kernel-list",
        &list,
        "--json-out",
        &json_out,
        "--fail-on-mismatch",
    ]);

    assert!(
        output.status.success(),
        "s176 mismatch excluded by the kernel list"
    );
    let text = fs::read_to_string(dir.path().join("compare.json")).unwrap();
    let payload: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(payload["kernels_compared"], 1);
}

/// Missing kernels in the candidate log fail the comparison
#[test]
fn compare_checksums_missing_kernel() {
    let dir = TempDir::new().unwrap();
    let (base, cand) = write_logs(
        dir.path(),
        "s000\t0.1\t0xaaaaaaaa\ns176\t0.2\t0xbbbbbbbb\n",
        "s000\t0.1\t0xaaaaaaaa\n",
    );
    let json_out = dir.path().join("compare.json").display().to_string();

    let output = run_vecgate(&[
        "compare-checksums",
        "--baseline",
        &base,
        "--candidate",
        &cand,
        "--json-out",
        &json_out,
        "--fail-on-mismatch",
    ]);

    assert_eq!(output.status.code(), Some(2));
    let text = fs::read_to_string(dir.path().join("compare.json")).unwrap();
    let payload: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(payload["ok"], false);
    assert_eq!(payload["missing_in_candidate"][0], "s176");
}
