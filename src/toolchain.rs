//! Cross-toolchain resolution and external process execution
//!
//! Locates clang, the linker, the disassembler, and the emulator from
//! explicit paths, environment overrides, or well-known build locations,
//! and runs them with captured output. The emulator runner polls with a
//! deadline and preserves whatever partial output the guest produced
//! before being killed.

use crate::error::{AuditError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Environment override for the compiler path
pub const CLANG_ENV: &str = "CLANG";
/// Environment override for the emulator path
pub const QEMU_ENV: &str = "QEMU";

const EMULATOR_NAME: &str = "qemu-system-linx64";

/// User-supplied tool paths, all optional
#[derive(Debug, Clone, Default)]
pub struct ToolchainSpec {
    pub clang: Option<PathBuf>,
    pub lld: Option<PathBuf>,
    pub llvm_objdump: Option<PathBuf>,
    pub qemu: Option<PathBuf>,
}

/// Fully resolved, existence-checked tool paths
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub clang: PathBuf,
    pub lld: PathBuf,
    pub llvm_objdump: PathBuf,
    /// Absent when the run skips emulation
    pub qemu: Option<PathBuf>,
}

/// Captured output of a finished process
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

fn expand_user(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var).ok().filter(|v| !v.is_empty()).map(|v| expand_user(&v))
}

fn home_candidates(rel_paths: &[&str]) -> Option<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from)?;
    rel_paths.iter().map(|rel| home.join(rel)).find(|p| p.exists())
}

fn sibling_tool(clang: &Path, tool: &str) -> Option<PathBuf> {
    let cand = clang.parent()?.join(tool);
    cand.exists().then_some(cand)
}

/// Fail when a resolved tool does not exist or is not executable
pub fn check_exe(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        return Err(AuditError::config(format!(
            "{what} not found: {}",
            path.display()
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o111 == 0 {
            return Err(AuditError::config(format!(
                "{what} not executable: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

impl Toolchain {
    /// Resolve every tool the run needs. Explicit paths win, then
    /// environment overrides, then sibling/well-known locations.
    pub fn resolve(spec: &ToolchainSpec, need_emulator: bool) -> Result<Self> {
        let clang = spec
            .clang
            .clone()
            .or_else(|| env_path(CLANG_ENV))
            .or_else(|| home_candidates(&["llvm-project/build-linxisa-clang/bin/clang"]))
            .ok_or_else(|| {
                AuditError::config(format!("clang not found; set --clang or {CLANG_ENV}"))
            })?;
        check_exe(&clang, "clang")?;

        let lld = spec
            .lld
            .clone()
            .or_else(|| sibling_tool(&clang, "ld.lld"))
            .or_else(|| sibling_tool(&clang, "lld"))
            .ok_or_else(|| AuditError::config("ld.lld/lld not found; set --lld"))?;
        check_exe(&lld, "ld.lld")?;

        let llvm_objdump = spec
            .llvm_objdump
            .clone()
            .or_else(|| sibling_tool(&clang, "llvm-objdump"))
            .ok_or_else(|| {
                AuditError::config("llvm-objdump not found; set --llvm-objdump or use clang sibling tool")
            })?;
        check_exe(&llvm_objdump, "llvm-objdump")?;

        let qemu = if need_emulator {
            let qemu = spec
                .qemu
                .clone()
                .or_else(|| env_path(QEMU_ENV))
                .or_else(|| {
                    home_candidates(&[
                        "qemu/build/qemu-system-linx64",
                        "qemu/build-tci/qemu-system-linx64",
                    ])
                })
                .ok_or_else(|| {
                    AuditError::config(format!(
                        "{EMULATOR_NAME} not found; set --qemu or {QEMU_ENV}"
                    ))
                })?;
            check_exe(&qemu, EMULATOR_NAME)?;
            Some(qemu)
        } else {
            None
        };

        Ok(Self {
            clang,
            lld,
            llvm_objdump,
            qemu,
        })
    }
}

fn log_command(program: &Path, args: &[String]) {
    eprintln!("+ {} {}", program.display(), args.join(" "));
}

/// Run a tool to completion, capturing stdout and stderr
pub fn run_captured(
    program: &Path,
    args: &[String],
    what: &str,
    verbose: bool,
) -> Result<CommandOutput> {
    if verbose {
        log_command(program, args);
    }
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| AuditError::tool(what, format!("failed to spawn: {e}")))?;
    Ok(CommandOutput {
        status_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Run a tool under a deadline, always writing stdout/stderr to the given
/// log files. A timeout kills the process, flushes the partial logs, and
/// reports where they landed.
pub fn run_with_timeout(
    program: &Path,
    args: &[String],
    what: &str,
    timeout_s: f64,
    stdout_log: &Path,
    stderr_log: &Path,
    verbose: bool,
) -> Result<CommandOutput> {
    if verbose {
        log_command(program, args);
    }
    if let Some(parent) = stdout_log.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = stderr_log.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AuditError::tool(what, format!("failed to spawn: {e}")))?;

    // Reader threads keep the pipes drained so a chatty guest cannot
    // deadlock against a full pipe buffer while we poll.
    let stdout_thread = drain_pipe(child.stdout.take());
    let stderr_thread = drain_pipe(child.stderr.take());

    let deadline = Duration::from_secs_f64(timeout_s);
    let start = Instant::now();
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if start.elapsed() > deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let stdout = stdout_thread.join().unwrap_or_default();
                    let stderr = stderr_thread.join().unwrap_or_default();
                    std::fs::write(stdout_log, &stdout)?;
                    std::fs::write(stderr_log, &stderr)?;
                    return Err(AuditError::Timeout {
                        what: what.to_string(),
                        seconds: timeout_s,
                        stdout_log: stdout_log.to_path_buf(),
                    });
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();
    std::fs::write(stdout_log, &stdout)?;
    std::fs::write(stderr_log, &stderr)?;
    Ok(CommandOutput {
        status_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}
