// This module groups the infrastructure shared by every pipeline of the spirc back end:
// the error types (compile, override and emit errors with the CompileResult alias) and the
// per-compilation session that carries pass statistics, dump configuration and the
// invariant-checking switch.

//! Core infrastructure shared by passes and pipelines.

pub mod error;
pub mod session;

pub use error::{CheckPhase, CompileError, CompileResult, EmitError, OverrideError};
pub use session::{CompilationSession, DumpPhase, PassCounts, SessionStats};
