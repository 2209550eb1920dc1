//! Analysis configuration.
//!
//! The options recognized by the analysis, threaded explicitly through the
//! pipeline context instead of living in process-global state.

use std::path::PathBuf;

/// Shared flags controlling the analysis pipeline.
#[derive(Clone, Debug, Default)]
pub struct Flags {
    /// Use the speculative dynamic indirect-call profile (when the embedder
    /// supplies one) to resolve indirect calls. When off, the auxiliary
    /// flow-insensitive analysis alone determines indirect targets.
    pub do_spec: bool,

    /// If set, dump the final points-to set for every pointer-typed
    /// instruction in this function at the end of the solve.
    pub debug_fcn: Option<String>,

    /// If set, dump the final points-to set for this global at the end of
    /// the solve.
    pub debug_glbl: Option<String>,

    /// If set, write a dot file per condensation phase (`G.dot`, `Gp.dot`,
    /// `G4.dot`, `G2.dot`, `G6.dot`, `G5.dot`, `CFG.dot`, `CFG_indir.dot`,
    /// `CFG_ssa.dot`) into this directory.
    pub dump_graphs: Option<PathBuf>,
}

impl Flags {
    /// Flags with everything at its default.
    pub fn new() -> Self {
        Self::default()
    }
}
