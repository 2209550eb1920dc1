//! Lowering the IR into constraints and a control-flow graph.
//!
//! Identification walks the module and hands every global, function,
//! allocation site, and pointer-typed value its id. Constraint generation
//! then lowers each used function into a private constraint graph (merged
//! into the program graph) while building the interprocedural CFG: one
//! preserving node per block plus a dedicated node per address-taken
//! operation, global-initializer stores as constant-modifying nodes with no
//! predecessors, and entry/exit nodes per function. Direct and external
//! calls are spliced immediately; indirect calls wait for the auxiliary
//! analysis.

use crate::cfg::{Cfg, CfgId, CfgNode};
use crate::constraint::{CallSite, CallTarget, ConstraintGraph};
use crate::extinfo::{ExtLibInfo, Summary};
use crate::ir::{self, Callee, IndirFunctionInfo, Inst, UnusedFunctions};
use crate::objects::{AllocKind, ObjectId, ObjectMap};
use crate::result::{AnalysisError, AnalysisResult};
use crate::settings::Flags;
use crate::andersen::AuxPtsto;
use crate::timing;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::mem;

/// Per-function ids and program points.
pub struct FuncInfo {
    /// The function's entry node.
    pub entry: CfgId,
    /// The function's exit node.
    pub exit: CfgId,
    /// The function's address object.
    pub obj: ObjectId,
    /// The function's return slot.
    pub ret: ObjectId,
}

/// Function information for every used internal function.
pub type FuncInfos = HashMap<ir::FuncId, FuncInfo>;

/// Identify objects and generate constraints for the whole module.
pub fn build(
    module: &ir::Module,
    unused: &dyn UnusedFunctions,
    ext: &ExtLibInfo,
    omap: &mut ObjectMap,
) -> AnalysisResult<(ConstraintGraph, Cfg, FuncInfos)> {
    identify_objects(module, unused, ext, omap)?;

    let _tt = timing::create_constraints();
    let mut cfg = Cfg::new();
    let mut infos = FuncInfos::new();
    for (f, fdata) in module.functions.iter() {
        if fdata.external || !unused.is_used(f) {
            continue;
        }
        let ret = omap.get_or_make_return(f, &fdata.name);
        omap.pin(ret);
        infos.insert(
            f,
            FuncInfo {
                entry: cfg.add_node(CfgNode::preserving()),
                exit: cfg.add_exit(),
                obj: omap.object_id(fdata.value).expect("function object identified"),
                ret,
            },
        );
    }

    let mut cg = ConstraintGraph::new();

    // The synthetic seeds.
    cg.add_addr_of(ObjectId::NULL_VALUE, ObjectId::NULL_OBJECT);
    cg.add_addr_of(ObjectId::UNIVERSAL_VALUE, ObjectId::UNIVERSAL_VALUE);
    cg.add_addr_of(ObjectId::ARGV_VALUE, ObjectId::ARGV_OBJECT);

    // Every function's value holds its address.
    for (_, fdata) in module.functions.iter() {
        let vid = omap.value_id(fdata.value).expect("function value identified");
        let obj = omap.object_id(fdata.value).expect("function object identified");
        cg.add_addr_of(vid, obj);
    }

    global_constraints(module, omap, &mut cg, &mut cfg)?;

    // Wire the initializer chain into the program start.
    if let Some(main) = module.function_named("main") {
        if let Some(info) = infos.get(&main) {
            cfg.add_edge(cfg.init, info.entry);
        }
    }

    // One constraint graph per function, merged into the program graph.
    for (f, fdata) in module.functions.iter() {
        if fdata.external || !unused.is_used(f) {
            continue;
        }
        let fcg = gen_function(module, f, unused, omap, &mut cfg, &infos)?;
        cg.merge(fcg);
    }

    resolve_calls(&mut cg, &mut cfg, module, &infos, ext, omap);

    Ok((cg, cfg, infos))
}

fn identify_objects(
    module: &ir::Module,
    unused: &dyn UnusedFunctions,
    ext: &ExtLibInfo,
    omap: &mut ObjectMap,
) -> AnalysisResult<()> {
    let _tt = timing::identify_objects();

    for g in &module.globals {
        let name = module.values[g.value].name.clone();
        omap.get_or_make_value(g.value, &name);
        omap.make_object(g.value, AllocKind::Global, g.fields, &name);
    }

    for (f, fdata) in module.functions.iter() {
        omap.get_or_make_value(fdata.value, &fdata.name);
        let obj = omap.make_object(fdata.value, AllocKind::Function, 1, &fdata.name);
        omap.set_function(obj, f);
    }

    for (f, fdata) in module.functions.iter() {
        if fdata.external || !unused.is_used(f) {
            continue;
        }
        for &p in &fdata.params {
            if module.is_pointer(p) {
                let name = module.values[p].name.clone();
                let pid = omap.get_or_make_value(p, &name);
                // Parameters receive copies when calls resolve, possibly
                // after the offline optimization.
                omap.pin(pid);
            }
        }
        for (b, bd) in fdata.blocks.iter() {
            if !unused.is_block_used(f, b) {
                continue;
            }
            for inst in &bd.insts {
                identify_inst(module, inst, ext, omap)?;
            }
        }
    }

    debug!("identified {} ids", omap.len());
    Ok(())
}

fn identify_inst(
    module: &ir::Module,
    inst: &Inst,
    ext: &ExtLibInfo,
    omap: &mut ObjectMap,
) -> AnalysisResult<()> {
    let value = |omap: &mut ObjectMap, v: ir::Value| {
        if module.is_pointer(v) {
            let name = module.values[v].name.clone();
            omap.get_or_make_value(v, &name);
        }
    };
    match inst {
        Inst::Alloc { dst, fields, heap } => {
            if !module.is_pointer(*dst) {
                return Err(AnalysisError::IrMalformed(format!(
                    "allocation result {} is not a pointer",
                    module.values[*dst].name
                )));
            }
            value(omap, *dst);
            let name = module.values[*dst].name.clone();
            let kind = if *heap { AllocKind::Heap } else { AllocKind::Stack };
            omap.make_object(*dst, kind, *fields, &name);
        }
        Inst::Copy { dst, .. }
        | Inst::Phi { dst, .. }
        | Inst::Gep { dst, .. }
        | Inst::Load { dst, .. } => value(omap, *dst),
        Inst::Store { .. } | Inst::Ret { .. } => {}
        Inst::Call { dst, callee, .. } => {
            if let Some(d) = dst {
                value(omap, *d);
                // Allocator calls are allocation sites.
                if let Callee::Direct(cf) = callee {
                    let fdata = &module.functions[*cf];
                    if fdata.external {
                        if let Some(Summary::AllocRet { fields }) = ext.get(&fdata.name) {
                            if module.is_pointer(*d) {
                                let name = module.values[*d].name.clone();
                                omap.make_object(*d, AllocKind::Heap, *fields, &name);
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

// Global initializers lower to constant stores hanging off the init node.
fn global_constraints(
    module: &ir::Module,
    omap: &mut ObjectMap,
    cg: &mut ConstraintGraph,
    cfg: &mut Cfg,
) -> AnalysisResult<()> {
    for g in &module.globals {
        let gval = omap.value_id(g.value).expect("global value identified");
        let gobj = omap.object_id(g.value).expect("global object identified");
        cg.add_addr_of(gval, gobj);

        for (field, init) in &g.init {
            let src = match init {
                ir::GlobalInit::Null => ObjectId::NULL_VALUE,
                ir::GlobalInit::Int => ObjectId::INT_VALUE,
                ir::GlobalInit::Address(v) => {
                    let obj = omap.object_id(*v).ok_or_else(|| {
                        AnalysisError::IrMalformed(format!(
                            "initializer of {} addresses a non-object",
                            module.values[g.value].name
                        ))
                    })?;
                    let tmp = omap.make_temp(&format!("{}.init", module.values[g.value].name));
                    cg.add_addr_of(tmp, obj);
                    tmp
                }
                ir::GlobalInit::AddressOffset(v, offs) => {
                    let obj = omap.object_id(*v).ok_or_else(|| {
                        AnalysisError::IrMalformed(format!(
                            "initializer of {} addresses a non-object",
                            module.values[g.value].name
                        ))
                    })?;
                    let tmp = omap.make_temp(&format!("{}.init", module.values[g.value].name));
                    cg.add_addr_of(tmp, obj.offset(*offs));
                    tmp
                }
                ir::GlobalInit::Opaque(desc) => {
                    return Err(AnalysisError::UnknownConstExpr(desc.clone()));
                }
            };

            // The pointer to the initialized field.
            let ptr = if *field == 0 {
                gval
            } else {
                let tmp = omap.make_temp(&format!(
                    "{}.field{}",
                    module.values[g.value].name, field
                ));
                cg.add_gep(tmp, gval, *field);
                tmp
            };

            let node = cfg.add_node(CfgNode::const_store());
            cfg.add_edge(node, cfg.init);
            cg.add_store(ptr, src, node);
        }
    }
    Ok(())
}

fn gen_function(
    module: &ir::Module,
    f: ir::FuncId,
    unused: &dyn UnusedFunctions,
    omap: &mut ObjectMap,
    cfg: &mut Cfg,
    infos: &FuncInfos,
) -> AnalysisResult<ConstraintGraph> {
    let fdata = &module.functions[f];
    let info = &infos[&f];
    let mut cg = ConstraintGraph::new();

    // main's argv parameter aliases the program arguments.
    if fdata.name == "main" {
        if let Some(&argv) = fdata.params.get(1) {
            if module.is_pointer(argv) {
                let pid = omap.value_id(argv).expect("param identified");
                cg.add_copy(pid, ObjectId::ARGV_VALUE);
            }
        }
    }

    let mut starts: HashMap<ir::Block, CfgId> = HashMap::new();
    for (b, _) in fdata.blocks.iter() {
        if unused.is_block_used(f, b) {
            starts.insert(b, cfg.add_node(CfgNode::preserving()));
        }
    }
    if let Some(&start) = starts.get(&fdata.entry) {
        cfg.add_edge(info.entry, start);
    }

    for (b, bd) in fdata.blocks.iter() {
        let start = match starts.get(&b) {
            Some(&s) => s,
            None => continue,
        };
        let mut cur = start;
        for inst in &bd.insts {
            cur = gen_inst(module, inst, cur, omap, cfg, &mut cg, info)?;
        }
        for succ in &bd.succs {
            if let Some(&s) = starts.get(succ) {
                cfg.add_edge(cur, s);
            }
        }
    }

    Ok(cg)
}

fn gen_inst(
    module: &ir::Module,
    inst: &Inst,
    cur: CfgId,
    omap: &mut ObjectMap,
    cfg: &mut Cfg,
    cg: &mut ConstraintGraph,
    info: &FuncInfo,
) -> AnalysisResult<CfgId> {
    let vid = |omap: &mut ObjectMap, v: ir::Value| {
        let name = module.values[v].name.clone();
        omap.get_or_make_value(v, &name)
    };
    let want_pointer = |v: ir::Value, what: &str| {
        if module.is_pointer(v) {
            Ok(())
        } else {
            Err(AnalysisError::IrMalformed(format!(
                "{} through non-pointer {}",
                what, module.values[v].name
            )))
        }
    };

    match inst {
        Inst::Alloc { dst, .. } => {
            let d = vid(omap, *dst);
            let obj = omap.object_id(*dst).expect("allocation identified");
            cg.add_addr_of(d, obj);
            Ok(cur)
        }
        Inst::Copy { dst, src } => {
            if module.is_pointer(*dst) {
                want_pointer(*src, "pointer copy")?;
                let d = vid(omap, *dst);
                let s = vid(omap, *src);
                cg.add_copy(d, s);
            }
            Ok(cur)
        }
        Inst::Phi { dst, srcs } => {
            // Phis lower to one copy per incoming value.
            if module.is_pointer(*dst) {
                let d = vid(omap, *dst);
                for &src in srcs {
                    want_pointer(src, "pointer phi")?;
                    let s = vid(omap, src);
                    cg.add_copy(d, s);
                }
            }
            Ok(cur)
        }
        Inst::Gep { dst, src, offset } => {
            if module.is_pointer(*dst) {
                want_pointer(*src, "field offset")?;
                let d = vid(omap, *dst);
                let s = vid(omap, *src);
                cg.add_gep(d, s, *offset);
            }
            Ok(cur)
        }
        Inst::Load { dst, src } => {
            want_pointer(*src, "load")?;
            if !module.is_pointer(*dst) {
                return Ok(cur);
            }
            let d = vid(omap, *dst);
            let s = vid(omap, *src);
            let node = cfg.add_node(CfgNode::load());
            cfg.add_edge(cur, node);
            cg.add_load(d, s, node);
            Ok(node)
        }
        Inst::Store { dst, src } => {
            want_pointer(*dst, "store")?;
            if !module.is_pointer(*src) {
                return Ok(cur);
            }
            let d = vid(omap, *dst);
            let s = vid(omap, *src);
            let node = cfg.add_node(CfgNode::store());
            cfg.add_edge(cur, node);
            cg.add_store(d, s, node);
            Ok(node)
        }
        Inst::Call { dst, callee, args } => {
            let node = cfg.add_node(CfgNode::preserving());
            cfg.add_edge(cur, node);
            let cont = cfg.add_node(CfgNode::preserving());

            let arg_ids = args
                .iter()
                .map(|&a| {
                    if module.is_pointer(a) {
                        Some(vid(omap, a))
                    } else {
                        None
                    }
                })
                .collect();
            let (dst_id, dst_value) = match dst {
                Some(d) if module.is_pointer(*d) => (Some(vid(omap, *d)), Some(*d)),
                _ => (None, None),
            };
            let (target, fp_value) = match callee {
                Callee::Direct(f) => (CallTarget::Direct(*f), None),
                Callee::Indirect(fp) => {
                    want_pointer(*fp, "indirect call")?;
                    // The result only gets its defining copy once the
                    // callee set is known.
                    if let Some(d) = dst_id {
                        omap.pin(d);
                    }
                    (CallTarget::Indirect(vid(omap, *fp)), Some(*fp))
                }
            };

            cg.calls.push(CallSite {
                callee: target,
                args: arg_ids,
                dst: dst_id,
                dst_value,
                fp_value,
                node,
                cont,
            });
            Ok(cont)
        }
        Inst::Ret { arg } => {
            if let Some(a) = arg {
                if module.is_pointer(*a) {
                    let s = vid(omap, *a);
                    cg.add_copy(info.ret, s);
                }
            }
            cfg.add_edge(cur, info.exit);
            Ok(cur)
        }
    }
}

// Splice direct and external calls; indirect ones wait for auxiliary
// results.
fn resolve_calls(
    cg: &mut ConstraintGraph,
    cfg: &mut Cfg,
    module: &ir::Module,
    infos: &FuncInfos,
    ext: &ExtLibInfo,
    omap: &mut ObjectMap,
) {
    let calls = mem::replace(&mut cg.calls, Vec::new());
    for call in calls {
        match call.callee {
            CallTarget::Direct(f) => {
                let fdata = &module.functions[f];
                if fdata.external {
                    apply_external(cg, cfg, omap, ext, &fdata.name, &call);
                } else if let Some(info) = infos.get(&f) {
                    splice_direct(cg, cfg, module, info, f, &call, omap);
                } else {
                    // A call into dead code never executes.
                    cfg.add_edge(call.node, call.cont);
                }
            }
            CallTarget::Indirect(_) => cg.indirect_calls.push(call),
        }
    }
}

// Ids go through the representative table so splices that run after the
// pointer-equivalence merges target the surviving representatives.
fn splice_direct(
    cg: &mut ConstraintGraph,
    cfg: &mut Cfg,
    module: &ir::Module,
    info: &FuncInfo,
    f: ir::FuncId,
    call: &CallSite,
    omap: &ObjectMap,
) {
    let fdata = &module.functions[f];
    for (i, &param) in fdata.params.iter().enumerate() {
        if let Some(Some(arg)) = call.args.get(i) {
            if let Some(pid) = omap.value_id(param) {
                cg.add_copy(omap.rep(pid), omap.rep(*arg));
            }
        }
    }
    if let Some(dst) = call.dst {
        cg.add_copy(omap.rep(dst), omap.rep(info.ret));
    }
    cfg.add_edge(call.node, info.entry);
    cfg.add_edge(info.exit, call.cont);
}

fn apply_external(
    cg: &mut ConstraintGraph,
    cfg: &mut Cfg,
    omap: &mut ObjectMap,
    ext: &ExtLibInfo,
    name: &str,
    call: &CallSite,
) {
    match ext.get(name) {
        Some(Summary::AllocRet { .. }) => {
            if let (Some(dst), Some(dv)) = (call.dst, call.dst_value) {
                let obj = omap.object_id(dv).expect("allocation site identified");
                cg.add_addr_of(omap.rep(dst), obj);
            }
            cfg.add_edge(call.node, call.cont);
        }
        Some(Summary::ReturnsArg(i)) => {
            if let (Some(dst), Some(Some(arg))) = (call.dst, call.args.get(*i)) {
                cg.add_copy(omap.rep(dst), omap.rep(*arg));
            }
            cfg.add_edge(call.node, call.cont);
        }
        Some(Summary::Transfer { to, from }) => {
            match (call.args.get(*to), call.args.get(*from)) {
                (Some(Some(to_arg)), Some(Some(from_arg))) => {
                    let tmp = omap.make_temp(&format!("{}.transfer", name));
                    let ln = cfg.add_node(CfgNode::load());
                    let sn = cfg.add_node(CfgNode::store());
                    cfg.add_edge(call.node, ln);
                    cfg.add_edge(ln, sn);
                    cfg.add_edge(sn, call.cont);
                    let to_arg = omap.rep(*to_arg);
                    cg.add_load(tmp, omap.rep(*from_arg), ln);
                    cg.add_store(to_arg, tmp, sn);
                    if let Some(dst) = call.dst {
                        cg.add_copy(omap.rep(dst), to_arg);
                    }
                }
                _ => cfg.add_edge(call.node, call.cont),
            }
        }
        Some(Summary::ReturnsStatic(obj)) => {
            if let Some(dst) = call.dst {
                cg.add_addr_of(omap.rep(dst), *obj);
            }
            cfg.add_edge(call.node, call.cont);
        }
        Some(Summary::ReturnsUniversal) => {
            if let Some(dst) = call.dst {
                cg.add_copy(omap.rep(dst), ObjectId::UNIVERSAL_VALUE);
            }
            cfg.add_edge(call.node, call.cont);
        }
        Some(Summary::PthreadGet) => {
            if let Some(dst) = call.dst {
                cg.add_copy(omap.rep(dst), ObjectId::PTHREAD_SPECIFIC_VALUE);
            }
            cfg.add_edge(call.node, call.cont);
        }
        Some(Summary::PthreadSet) => {
            if let Some(Some(arg)) = call.args.get(1) {
                cg.add_copy(ObjectId::PTHREAD_SPECIFIC_VALUE, omap.rep(*arg));
            }
            cfg.add_edge(call.node, call.cont);
        }
        Some(Summary::Noop) => {
            cfg.add_edge(call.node, call.cont);
        }
        None => widen_call(cg, cfg, omap, name, call),
    }
}

// The ExternalUnmodeled recovery: the universal set flows into the return
// and through every pointer argument.
fn widen_call(
    cg: &mut ConstraintGraph,
    cfg: &mut Cfg,
    omap: &ObjectMap,
    name: &str,
    call: &CallSite,
) {
    warn!("no summary for external function {}, widening", name);
    if let Some(dst) = call.dst {
        cg.add_copy(omap.rep(dst), ObjectId::UNIVERSAL_VALUE);
    }
    let mut cur = call.node;
    for arg in call.args.iter().flatten() {
        let sn = cfg.add_node(CfgNode::store());
        cfg.add_edge(cur, sn);
        cg.add_store(omap.rep(*arg), ObjectId::UNIVERSAL_VALUE, sn);
        cur = sn;
    }
    cfg.add_edge(cur, call.cont);
}

/// Resolves indirect call sites against the auxiliary points-to results,
/// one round at a time. The auxiliary solve and the resolver alternate
/// until no round splices anything new.
pub struct IndirResolver {
    spliced: HashSet<(usize, ir::FuncId)>,
    widened: HashSet<usize>,
}

impl IndirResolver {
    /// A resolver with nothing spliced yet.
    pub fn new() -> Self {
        Self {
            spliced: HashSet::new(),
            widened: HashSet::new(),
        }
    }

    /// Splice every indirect call target visible in `aux` that has not
    /// been spliced before. Returns whether anything new was added.
    pub fn resolve_round(
        &mut self,
        cg: &mut ConstraintGraph,
        cfg: &mut Cfg,
        module: &ir::Module,
        infos: &FuncInfos,
        aux: &dyn AuxPtsto,
        indir: Option<&dyn IndirFunctionInfo>,
        flags: &Flags,
        ext: &ExtLibInfo,
        omap: &mut ObjectMap,
    ) -> AnalysisResult<bool> {
        let _tt = timing::add_indirect_calls();
        let mut changed = false;
        let calls = cg.indirect_calls.clone();

        for (idx, call) in calls.iter().enumerate() {
            let fp = match call.callee {
                CallTarget::Indirect(id) => id,
                CallTarget::Direct(_) => continue,
            };

            let mut targets: Vec<ir::FuncId> = Vec::new();
            let mut widen = false;
            let mut profiled = false;
            if flags.do_spec {
                if let (Some(ii), Some(fpv)) = (indir, call.fp_value) {
                    if let Some(list) = ii.targets(fpv) {
                        targets.extend_from_slice(list);
                        profiled = true;
                    }
                }
            }
            if !profiled {
                // An absent entry means the pointer is never assigned:
                // no targets, not unknown targets.
                if let Some(set) = aux.points_to(omap.rep(fp)) {
                    for o in set.iter() {
                        if !omap.is_valid(o) {
                            return Err(AnalysisError::AuxMismatch(o.as_u32()));
                        }
                        if o == ObjectId::UNIVERSAL_VALUE {
                            widen = true;
                        } else if let Some(f) = omap.function_of(o) {
                            targets.push(f);
                        }
                    }
                }
            }

            if widen {
                if self.widened.insert(idx) {
                    widen_call(cg, cfg, omap, "indirect call", call);
                    changed = true;
                }
                continue;
            }
            if targets.is_empty() {
                // Keep the continuation reachable even when the pointer
                // resolves to nothing.
                cfg.add_edge(call.node, call.cont);
                continue;
            }
            for f in targets {
                if !self.spliced.insert((idx, f)) {
                    continue;
                }
                changed = true;
                let fdata = &module.functions[f];
                debug!("indirect call resolves to {}", fdata.name);
                if fdata.external {
                    apply_external(cg, cfg, omap, ext, &fdata.name, call);
                } else if let Some(info) = infos.get(&f) {
                    splice_direct(cg, cfg, module, info, f, call, omap);
                } else {
                    cfg.add_edge(call.node, call.cont);
                }
            }
        }
        Ok(changed)
    }
}
