//! vecgate: strict auto-vectorization coverage auditor
//!
//! Builds the TSVC loop suite per vectorization mode with an external cross
//! toolchain, runs it under an emulator, and fuses two evidence sources into
//! one strict verdict per kernel: the compiler's loop remarks and the
//! structural markers in the final disassembly. A kernel only counts as
//! vectorized when the remark says the loop lowered to a vector block AND
//! the binary shows the policy-matched block header, a reachable vector
//! instruction, and a decoupled-body transfer. Everything that misses is
//! sorted into a fixed gap-bucket taxonomy with a suggested next action.
//!
//! # Example
//!
//! ```rust
//! use vecgate::classify::classify_kernel;
//! use vecgate::disasm::DisasmIndex;
//! use vecgate::remarks::{group_by_function, parse_remarks_text};
//!
//! let remarks = group_by_function(parse_remarks_text(
//!     r#"{"function": "s2111", "status": "lowered", "reason": "lowered_vblock_memseq", "touches_memory": true}"#,
//! ));
//! let index = DisasmIndex::parse(
//!     "0000000000010000 <s2111>:\n\
//!      \x20  10000: 00 01   bstart.mseq x1, x2\n\
//!      \x20  10004: 02 03   b.text s2111_body\n\
//!      0000000000010100 <s2111_body>:\n\
//!      \x20  10100: 04 05   v.add v0, v1, v2\n",
//! );
//! let (evidence, _body) = index.evidence("s2111");
//! let row = classify_kernel("s2111", &remarks, &evidence, "auto");
//! assert!(row.strict_vectorized);
//! ```

#![allow(clippy::unwrap_used)] // Safe for compile-time constant regex
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod checksum;
pub mod classify;
pub mod disasm;
pub mod driver;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod remarks;
pub mod report;
pub mod stage;
pub mod toolchain;

pub use checksum::{compare_logs, ChecksumComparison, ChecksumMismatch};
pub use classify::{classify_kernel, ClassificationResult, GapBucket};
pub use disasm::{DisasmEvidence, DisasmIndex};
pub use driver::{compile_flags, Builder, VectorMode};
pub use error::{AuditError, Result};
pub use pipeline::{analyze_mode, run_pipeline, PipelineConfig, RunSummary};
pub use remarks::{group_by_function, load_remarks, parse_remarks_text, LoopRemark};
pub use report::{build_coverage, build_gap_plan, CoveragePayload, GapPlanPayload};
pub use stage::{stage_suite, SourcePolicy, StageOptions, StagedSuite};
pub use toolchain::{Toolchain, ToolchainSpec};
