//! The analysis pipeline context.
//!
//! `Context` owns the configuration and drives the phases in order:
//! identify and lower, optimize, auxiliary solve and indirect-call
//! resolution, condense, fill the def-use graph, partition, solve. Each
//! phase's product is released as soon as the next phase has consumed it;
//! the def-use graph is the only structure alive during the solve.

use crate::alias::Analysis;
use crate::andersen;
use crate::cfg_printer::DotDumper;
use crate::dug::Dug;
use crate::extinfo::ExtLibInfo;
use crate::hu;
use crate::ir::{self, AllUsed, IndirFunctionInfo, UnusedFunctions};
use crate::objects::ObjectMap;
use crate::result::AnalysisResult;
use crate::settings::Flags;
use crate::solve::Solver;
use crate::timing;
use crate::translate::{self, IndirResolver};
use crate::ptsto::TopLevelPtsto;
use log::info;

/// The analysis driver.
pub struct Context {
    /// The configuration this context runs with.
    pub flags: Flags,
    ext: ExtLibInfo,
}

impl Context {
    /// A context with the default external-library summaries.
    pub fn new(flags: Flags) -> Self {
        Self {
            flags,
            ext: ExtLibInfo::with_defaults(),
        }
    }

    /// A context with a custom summary table.
    pub fn with_ext_info(flags: Flags, ext: ExtLibInfo) -> Self {
        Self { flags, ext }
    }

    /// Analyze `module` assuming all code is live and no dynamic
    /// indirect-call profile exists.
    pub fn analyze(&self, module: &ir::Module) -> AnalysisResult<Analysis> {
        self.analyze_with(module, &AllUsed, None)
    }

    /// Analyze `module` with dead-code information and an optional
    /// indirect-call profile (consulted under `do_spec`).
    pub fn analyze_with(
        &self,
        module: &ir::Module,
        unused: &dyn UnusedFunctions,
        indir: Option<&dyn IndirFunctionInfo>,
    ) -> AnalysisResult<Analysis> {
        let dumper = DotDumper::new(self.flags.dump_graphs.clone());
        let mut omap = ObjectMap::new();

        let (mut cg, mut cfg, infos) = translate::build(module, unused, &self.ext, &mut omap)?;
        dumper.dump("CFG.dot", &cfg.seg);

        {
            let _tt = timing::optimize_constraints();
            hu::optimize(&mut cg, &mut omap);
        }

        // The auxiliary solve and indirect-call resolution alternate until
        // no new targets appear.
        let mut resolver = IndirResolver::new();
        let aux = loop {
            let aux = andersen::solve(&cg, &omap);
            let changed = resolver.resolve_round(
                &mut cg,
                &mut cfg,
                module,
                &infos,
                &aux,
                indir,
                &self.flags,
                &self.ext,
                &mut omap,
            )?;
            if !changed {
                break aux;
            }
        };
        // Splices may have re-introduced merged ids or duplicates.
        cg.rewrite_and_dedup(|id| omap.rep(id));
        dumper.dump("CFG_indir.dot", &cfg.seg);

        let ssa = {
            let _tt = timing::compute_ssa();
            cfg.compute_ssa(&dumper)
        };
        dumper.dump("CFG_ssa.dot", &ssa.seg);

        let mut dug = Dug::new();
        dug.structs = omap.struct_info();
        dug.fill_top_level(&cg);
        // The constraint graph and the raw CFG are consumed.
        drop(cg);
        drop(cfg);

        partition_phase(&mut dug, &ssa, &aux, &omap);
        drop(aux);

        let solution = {
            let mut solver = Solver::new(&mut dug, &omap);
            solver.solve();
            solver.finish()
        };

        self.debug_dumps(module, &omap, &solution.pts_top);
        Ok(Analysis::new(omap, solution))
    }

    // The configured per-function / per-global result dumps.
    fn debug_dumps(&self, module: &ir::Module, omap: &ObjectMap, pts_top: &TopLevelPtsto) {
        let dump_value = |v: ir::Value| {
            let id = match omap.value_id(v) {
                Some(id) => omap.rep(id),
                None => return,
            };
            let mut offs = 0;
            while let Some(set) = pts_top.get(id, offs) {
                info!("pts_top[{}][{}]: {:?}", omap.name(id), offs, set);
                offs += 1;
            }
        };

        if let Some(name) = &self.flags.debug_fcn {
            info!("printing ptsto for function: {}", name);
            if let Some(f) = module.function_named(name) {
                for (_, block) in module.functions[f].blocks.iter() {
                    for inst in &block.insts {
                        if let Some(dst) = inst_result(inst) {
                            if module.is_pointer(dst) {
                                dump_value(dst);
                            }
                        }
                    }
                }
            }
        }

        if let Some(name) = &self.flags.debug_glbl {
            info!("printing ptsto for global: {}", name);
            for g in &module.globals {
                if &module.values[g.value].name == name {
                    dump_value(g.value);
                }
            }
        }
    }
}

fn inst_result(inst: &ir::Inst) -> Option<ir::Value> {
    match inst {
        ir::Inst::Alloc { dst, .. }
        | ir::Inst::Copy { dst, .. }
        | ir::Inst::Phi { dst, .. }
        | ir::Inst::Gep { dst, .. }
        | ir::Inst::Load { dst, .. } => Some(*dst),
        ir::Inst::Call { dst, .. } => *dst,
        ir::Inst::Store { .. } | ir::Inst::Ret { .. } => None,
    }
}

// Partitioning plus the per-partition SSA splice.
fn partition_phase(
    dug: &mut Dug,
    ssa: &crate::cfg::Cfg,
    aux: &andersen::AndersenSolution,
    omap: &ObjectMap,
) {
    let pinfo = crate::partition::compute_partitions(dug, aux, omap);
    crate::partition::add_partitions_to_dug(dug, ssa, &pinfo);
}
