// This module defines the error types of the spirc back end using the thiserror crate.
// CompileError is the main error enum for the pass pipelines: structural invariant
// violations caught by the verifier before or after a named pipeline, individual pass
// failures, pipeline context wrapping (so a message names every enclosing pipeline), base
// compiler and toolchain failures, and graph editing errors. Emission has its own pair of
// types: OverrideError covers reading and parsing a lowered module override from disk and
// is always fatal, and EmitError combines it with ordinary compile errors so callers can
// tell the two apart. CompileResult<T> is the convenience alias used by every pass.

//! Error types for the spirc back end.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::graph::GraphError;

/// When a structural check ran relative to its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    Before,
    After,
}

impl fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckPhase::Before => f.write_str("before"),
            CheckPhase::After => f.write_str("after"),
        }
    }
}

/// Main error type for graph compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Invariant violation {phase} pipeline '{pipeline}': {reason}")]
    InvariantViolation {
        pipeline: String,
        phase: CheckPhase,
        reason: String,
    },

    #[error("Pass '{pass}' failed: {reason}")]
    PassFailed { pass: &'static str, reason: String },

    #[error("In pipeline '{pipeline}': {source}")]
    Pipeline {
        pipeline: String,
        #[source]
        source: Box<CompileError>,
    },

    #[error("Base compiler failed: {reason}")]
    BaseCompiler { reason: String },

    #[error("Portable lowering failed: {diagnostic}")]
    Toolchain { diagnostic: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl CompileError {
    pub fn pass_failed(pass: &'static str, reason: impl Into<String>) -> Self {
        CompileError::PassFailed {
            pass,
            reason: reason.into(),
        }
    }

    /// The innermost error, past any pipeline context.
    pub fn root_cause(&self) -> &CompileError {
        match self {
            CompileError::Pipeline { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Names of the enclosing pipelines, outermost first.
    pub fn pipeline_trail(&self) -> Vec<&str> {
        let mut trail = Vec::new();
        let mut current = self;
        while let CompileError::Pipeline { pipeline, source } = current {
            trail.push(pipeline.as_str());
            current = source;
        }
        if let CompileError::InvariantViolation { pipeline, .. } = current {
            trail.push(pipeline.as_str());
        }
        trail
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Failure to load a lowered module override from disk.
#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("Failed to read override '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse override '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

/// Errors of binary emission.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Fatal override error: {0}")]
    Override(#[from] OverrideError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl EmitError {
    /// Override failures abort the compilation; compile errors are ordinary diagnostics.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EmitError::Override(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_context_names_every_level() {
        let err = CompileError::Pipeline {
            pipeline: "outer".to_string(),
            source: Box::new(CompileError::Pipeline {
                pipeline: "inner".to_string(),
                source: Box::new(CompileError::pass_failed("dce", "boom")),
            }),
        };
        let message = err.to_string();
        assert!(message.contains("outer"));
        assert!(message.contains("inner"));
        assert!(message.contains("boom"));
        assert_eq!(err.pipeline_trail(), vec!["outer", "inner"]);
        assert!(matches!(err.root_cause(), CompileError::PassFailed { pass: "dce", .. }));
    }

    #[test]
    fn test_override_errors_are_fatal() {
        let fatal = EmitError::from(OverrideError::Parse {
            path: PathBuf::from("module_0001.g.spir"),
            reason: "bad".to_string(),
        });
        assert!(fatal.is_fatal());
        let soft = EmitError::from(CompileError::Toolchain {
            diagnostic: "x".to_string(),
        });
        assert!(!soft.is_fatal());
    }
}
