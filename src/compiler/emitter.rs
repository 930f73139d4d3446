//! Binary emission with the lowered-module file override.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CompileConfig;
use crate::core::{CompilationSession, DumpPhase, EmitError, OverrideError};
use crate::graph::Graph;

use super::lowered::LoweredModule;
use super::SpirCompiler;

/// First candidate whose file name starts with `prefix`.
pub fn find_override<'a>(prefix: &str, candidates: &'a [PathBuf]) -> Option<&'a Path> {
    candidates
        .iter()
        .map(PathBuf::as_path)
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(prefix))
        })
}

/// Load the override for `debug_module` from `candidates`, if one matches.
///
/// Candidates are matched on their file name starting with the module's file
/// prefix and the separating `.`, so differently suffixed variants of a dump are
/// accepted but a module whose name merely extends this one's is not. A matching
/// file that cannot be read or parsed is an error; no match is not.
pub fn maybe_load_lowered_from_file(
    debug_module: Option<&Graph>,
    candidates: &[PathBuf],
    session: &CompilationSession,
) -> Result<Option<LoweredModule>, OverrideError> {
    let Some(module) = debug_module else {
        return Ok(None);
    };
    let prefix = format!("{}.", module.file_prefix());
    let Some(path) = find_override(&prefix, candidates) else {
        if !candidates.is_empty() {
            session.record_override_miss(&prefix);
        }
        return Ok(None);
    };

    log::info!("Loading lowered module from file: {}", path.display());
    let text = fs::read_to_string(path).map_err(|source| OverrideError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let loaded = LoweredModule::parse(&text).map_err(|err| OverrideError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    // Record which module is actually used.
    session.dump_graph(&loaded.graph, "emitter", "lowered-module", DumpPhase::Override);
    Ok(Some(loaded))
}

impl SpirCompiler {
    /// Produce `(metadata, binary)` for `module`.
    ///
    /// The portable lowering only runs when `debug_module` is given; without it
    /// the binary is empty. The metadata string is always empty.
    pub fn compile_target_binary(
        &self,
        config: &CompileConfig,
        module: &LoweredModule,
        debug_module: Option<&Graph>,
        session: &CompilationSession,
    ) -> Result<(String, Vec<u8>), EmitError> {
        log::trace!(
            "Emitting '{}' (relocatable: {}, toolchain dir: {:?})",
            module.graph.name(),
            config.options.relocatable,
            config.toolchain_dir
        );
        let loaded = maybe_load_lowered_from_file(debug_module, &config.debug.lowered_ir_files, session)?;
        let selected = loaded.as_ref().unwrap_or(module);

        let text = match debug_module {
            Some(_) => self.lowering().lower(
                selected,
                config.capability(),
                &config.debug,
                config.toolchain_dir.as_deref(),
            )?,
            None => String::new(),
        };
        Ok((String::new(), text.into_bytes()))
    }
}
