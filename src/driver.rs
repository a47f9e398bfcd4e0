//! Freestanding build and emulation driver
//!
//! Compiles the staged suite per vector mode, links the bare-metal ELF,
//! disassembles it, and boots it under the emulator. Mode selection is the
//! only thing that changes between builds; everything else is pinned so
//! off-vs-auto checksum parity compares like with like.

use crate::checksum;
use crate::error::{AuditError, Result};
use crate::toolchain::{run_captured, run_with_timeout, Toolchain};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Baseline flags for every compile: freestanding, no stock vectorizers,
/// single-precision constants to match the suite's real_t profile.
pub const BASE_CFLAGS: [&str; 11] = [
    "-O2",
    "-fsingle-precision-constant",
    "-ffreestanding",
    "-fno-builtin",
    "-fno-stack-protector",
    "-fno-asynchronous-unwind-tables",
    "-fno-unwind-tables",
    "-fno-exceptions",
    "-fno-jump-tables",
    "-nostdlib",
    "-std=gnu11",
];

/// Vectorization mode under audit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    /// Scalar baseline, autovec pass disabled
    Off,
    /// Memory-sequential lowering only
    MemSeq,
    /// Memory-parallel lowering (safe subset)
    MemPar,
    /// Pass picks per loop
    Auto,
}

impl VectorMode {
    /// Build order for `all` runs
    pub const ALL: [VectorMode; 4] = [
        VectorMode::Off,
        VectorMode::MemSeq,
        VectorMode::MemPar,
        VectorMode::Auto,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::MemSeq => "mseq",
            Self::MemPar => "mpar",
            Self::Auto => "auto",
        }
    }

    /// Value for the pass's mode option; `None` means the pass is disabled
    #[must_use]
    pub fn autovec_mode(self) -> Option<&'static str> {
        match self {
            Self::Off => None,
            Self::MemSeq => Some("mseq"),
            Self::MemPar => Some("mpar-safe"),
            Self::Auto => Some("auto"),
        }
    }

    /// Remark emission only makes sense when the pass runs
    #[must_use]
    pub fn emits_remarks(self) -> bool {
        self != Self::Off
    }
}

impl std::str::FromStr for VectorMode {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(Self::Off),
            "mseq" => Ok(Self::MemSeq),
            "mpar" => Ok(Self::MemPar),
            "auto" => Ok(Self::Auto),
            other => Err(AuditError::config(format!(
                "unsupported vector mode: {other}"
            ))),
        }
    }
}

/// Mode-specific compile flags. The stock vectorizers stay off in every
/// mode so any vector code in the binary is attributable to the pass under
/// audit.
#[must_use]
pub fn compile_flags(mode: VectorMode, remarks_jsonl: Option<&Path>) -> Vec<String> {
    let mut flags = vec!["-fno-vectorize".to_string(), "-fno-slp-vectorize".to_string()];
    match mode.autovec_mode() {
        None => {
            flags.push("-mllvm".to_string());
            flags.push("-linx-simt-autovec=0".to_string());
        }
        Some(autovec_mode) => {
            flags.push("-mllvm".to_string());
            flags.push("-linx-simt-autovec=1".to_string());
            flags.push("-mllvm".to_string());
            flags.push(format!("-linx-simt-autovec-mode={autovec_mode}"));
            if let Some(path) = remarks_jsonl {
                flags.push("-mllvm".to_string());
                flags.push(format!("-linx-simt-autovec-remarks={}", path.display()));
            }
        }
    }
    flags
}

/// One toolchain + target pairing, reused across modes
#[derive(Debug)]
pub struct Builder<'a> {
    pub toolchain: &'a Toolchain,
    pub target: String,
    pub verbose: bool,
}

impl<'a> Builder<'a> {
    #[must_use]
    pub fn new(toolchain: &'a Toolchain, target: impl Into<String>, verbose: bool) -> Self {
        Self {
            toolchain,
            target: target.into(),
            verbose,
        }
    }

    /// Compile one C file to an object
    pub fn compile_object(
        &self,
        src: &Path,
        out_obj: &Path,
        include_dirs: &[PathBuf],
        extra_cflags: &[String],
    ) -> Result<()> {
        if let Some(parent) = out_obj.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut args = vec!["-target".to_string(), self.target.clone()];
        args.extend(BASE_CFLAGS.iter().map(|f| (*f).to_string()));
        args.extend(include_dirs.iter().map(|d| format!("-I{}", d.display())));
        args.extend(extra_cflags.iter().cloned());
        args.push("-c".to_string());
        args.push(src.display().to_string());
        args.push("-o".to_string());
        args.push(out_obj.display().to_string());

        let out = run_captured(&self.toolchain.clang, &args, "compile", self.verbose)?;
        if !out.success() {
            return Err(AuditError::tool(
                "compile",
                format!(
                    "{}\n{}",
                    src.display(),
                    String::from_utf8_lossy(&out.stderr)
                ),
            ));
        }
        Ok(())
    }

    /// Link objects into a freestanding ELF entered at `_start`
    pub fn link_elf(&self, out_elf: &Path, objs: &[PathBuf]) -> Result<()> {
        if let Some(parent) = out_elf.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut args = vec![
            "--entry=_start".to_string(),
            "-o".to_string(),
            out_elf.display().to_string(),
        ];
        args.extend(objs.iter().map(|o| o.display().to_string()));

        let out = run_captured(&self.toolchain.lld, &args, "link", self.verbose)?;
        if !out.success() {
            return Err(AuditError::tool(
                "link",
                format!(
                    "{}\n{}",
                    out_elf.display(),
                    String::from_utf8_lossy(&out.stderr)
                ),
            ));
        }
        Ok(())
    }

    /// Disassemble an ELF, persist the text, and return it for analysis
    pub fn disassemble(&self, elf: &Path, out_path: &Path) -> Result<String> {
        let args = vec![
            "-d".to_string(),
            format!("--triple={}", self.target),
            elf.display().to_string(),
        ];
        let out = run_captured(&self.toolchain.llvm_objdump, &args, "disassemble", self.verbose)?;
        if !out.success() {
            return Err(AuditError::tool(
                "disassemble",
                format!(
                    "{}\n{}",
                    elf.display(),
                    String::from_utf8_lossy(&out.stderr)
                ),
            ));
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(out_path, &out.stdout)?;
        Ok(out.stdout_text())
    }

    /// Boot the ELF under the emulator and return guest stdout
    pub fn run_emulator(
        &self,
        elf: &Path,
        stdout_log: &Path,
        stderr_log: &Path,
        timeout_s: f64,
    ) -> Result<String> {
        let qemu = self
            .toolchain
            .qemu
            .as_ref()
            .ok_or_else(|| AuditError::config("emulator not resolved for this run"))?;
        let args = vec![
            "-machine".to_string(),
            "virt".to_string(),
            "-kernel".to_string(),
            elf.display().to_string(),
            "-nographic".to_string(),
            "-monitor".to_string(),
            "none".to_string(),
        ];
        let out = run_with_timeout(
            qemu,
            &args,
            "emulator",
            timeout_s,
            stdout_log,
            stderr_log,
            self.verbose,
        )?;
        if !out.success() {
            return Err(AuditError::tool(
                "emulator",
                format!(
                    "exit={}\n  stdout: {}\n  stderr: {}",
                    out.status_code,
                    stdout_log.display(),
                    stderr_log.display()
                ),
            ));
        }
        Ok(out.stdout_text())
    }

    /// Compile every C file under the runtime directory into objects.
    /// The softfp translation unit is kept at -O0: optimizing the
    /// soft-float routines re-introduces the libcalls they implement.
    pub fn build_runtime_objects(
        &self,
        runtime_dir: Option<&Path>,
        include_dirs: &[PathBuf],
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let Some(runtime_dir) = runtime_dir else {
            return Ok(Vec::new());
        };
        if !runtime_dir.is_dir() {
            return Err(AuditError::config(format!(
                "missing runtime source tree: {}",
                runtime_dir.display()
            )));
        }
        let rt_dir = out_dir.join("_runtime");
        fs::create_dir_all(&rt_dir)?;

        let mut sources: Vec<PathBuf> = WalkDir::new(runtime_dir)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .filter(|p| p.extension().is_some_and(|ext| ext == "c"))
            .collect();
        sources.sort();
        if sources.is_empty() {
            return Err(AuditError::config(format!(
                "no runtime sources under: {}",
                runtime_dir.display()
            )));
        }

        let mut objs = Vec::new();
        for src in sources {
            let stem = src
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    AuditError::config(format!("bad runtime source name: {}", src.display()))
                })?;
            let mut extra = compile_flags(VectorMode::Off, None);
            if stem == "softfp" {
                extra.push("-O0".to_string());
            }
            let obj = rt_dir.join(format!("{stem}.o"));
            self.compile_object(&src, &obj, include_dirs, &extra)?;
            objs.push(obj);
        }
        Ok(objs)
    }
}

/// Guest output must show both sentinel column headers before any row is
/// trusted.
pub fn verify_run_output(text: &str, mode: VectorMode, stdout_log: &Path) -> Result<()> {
    if !text.contains("Loop") || !text.contains("Checksum") {
        return Err(AuditError::tool(
            "emulator",
            format!(
                "output missing header ({})\n  stdout: {}",
                mode.as_str(),
                stdout_log.display()
            ),
        ));
    }
    Ok(())
}

/// Per-kernel checksums for the expected kernel set, first occurrence wins
#[must_use]
pub fn parse_kernel_checksums(
    stdout_text: &str,
    expected_kernels: &[String],
) -> BTreeMap<String, String> {
    let rows = checksum::parse_log(stdout_text);
    expected_kernels
        .iter()
        .filter_map(|k| rows.get(k).map(|row| (k.clone(), row.checksum.clone())))
        .collect()
}
