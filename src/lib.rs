//! spirc - target back end for a portable-binary GPU compiler.
//!
//! spirc takes a hardware-independent computation graph, applies the
//! target-specific legalization and simplification pipelines, and lowers the
//! result into a portable SPIR module for the device runtime.
//!
//! # Primary Usage
//!
//! ```no_run
//! use spirc::{CompileConfig, Graph, SpirCompiler};
//!
//! let text = std::fs::read_to_string("net.graph")?;
//! let graph = Graph::parse(&text)?;
//! let artifact = SpirCompiler::default().compile(graph, &CompileConfig::default())?;
//! std::fs::write("net.spv", &artifact.binary)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! - [`graph`] - Computation graph IR, text format and structural verifier
//! - [`pass`] - Pass trait, named pipelines and the fixed-point runner
//! - [`passes`] - The graph rewrites the pipelines are built from
//! - [`compiler`] - Pipeline builders, stage entry points and binary emission
//! - [`core`] - Errors and the per-compilation session
//! - [`config`] - Target capability, feature flags and debug options

pub mod compiler;
pub mod config;
pub mod core;
pub mod graph;
pub mod pass;
pub mod passes;

pub use compiler::{
    BaseCompiler, CompiledArtifact, DefaultBaseCompiler, LoweredModule, PortableLowering, SpirCompiler,
    TextualSpirLowering,
};
pub use config::{
    CapabilityFeatures, CompileConfig, CompileOptions, DebugOptions, DeviceDescription, DnnVersion, FeatureFlags,
    TargetCapability, TargetConfig,
};
pub use core::{
    CheckPhase, CompilationSession, CompileError, CompileResult, EmitError, OverrideError, SessionStats,
};
pub use graph::{Graph, Verifier};
pub use pass::{run_to_fixed_point, FixedPoint, Pass, Pipeline};
