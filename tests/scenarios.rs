//! End-to-end scenarios over the full pipeline, built on the minimal IR.

use sparseflow::ir::{self, Callee, Inst, Type};
use sparseflow::objects::ObjectId;
use sparseflow::{AliasResult, Analysis, Context, Flags};

fn analyze(m: &ir::Module) -> Analysis {
    Context::new(Flags::default())
        .analyze(m)
        .expect("analysis succeeds")
}

fn pts(analysis: &Analysis, v: ir::Value) -> Vec<ObjectId> {
    analysis.points_to(v).collect()
}

// int *p; int a, b; p = &a; p = &b; use(*p);
#[test]
fn s1_strong_update() {
    let mut m = ir::Module::new();
    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;

    let pp = m.make_value("pp", Type::Ptr); // &p
    let pa = m.make_value("pa", Type::Ptr); // &a
    let pb = m.make_value("pb", Type::Ptr); // &b
    let r = m.make_value("r", Type::Ptr);

    m.push_inst(main, b, Inst::Alloc { dst: pp, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: pa, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: pb, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Store { dst: pp, src: pa });
    m.push_inst(main, b, Inst::Store { dst: pp, src: pb });
    m.push_inst(main, b, Inst::Load { dst: r, src: pp });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let b_obj = analysis.object_id(pb).unwrap();

    // The second store strongly updates p's slot.
    assert_eq!(pts(&analysis, r), vec![b_obj]);
    assert_eq!(analysis.alias(r, pa), AliasResult::NoAlias);
    assert_eq!(analysis.alias(r, pb), AliasResult::MayAlias);
}

// int *p; if (c) p = &a; else p = &b; use(*p);
#[test]
fn s2_may_alias_join() {
    let mut m = ir::Module::new();
    let main = m.declare_function("main", vec![], false);
    let b0 = m.functions[main].entry;
    let b1 = m.add_block(main);
    let b2 = m.add_block(main);
    let b3 = m.add_block(main);

    let pp = m.make_value("pp", Type::Ptr);
    let pa = m.make_value("pa", Type::Ptr);
    let pb = m.make_value("pb", Type::Ptr);
    let r = m.make_value("r", Type::Ptr);

    m.push_inst(main, b0, Inst::Alloc { dst: pp, fields: 1, heap: false });
    m.push_inst(main, b0, Inst::Alloc { dst: pa, fields: 1, heap: false });
    m.push_inst(main, b0, Inst::Alloc { dst: pb, fields: 1, heap: false });
    m.add_block_edge(main, b0, b1);
    m.add_block_edge(main, b0, b2);

    m.push_inst(main, b1, Inst::Store { dst: pp, src: pa });
    m.add_block_edge(main, b1, b3);
    m.push_inst(main, b2, Inst::Store { dst: pp, src: pb });
    m.add_block_edge(main, b2, b3);

    m.push_inst(main, b3, Inst::Load { dst: r, src: pp });
    m.push_inst(main, b3, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let a_obj = analysis.object_id(pa).unwrap();
    let b_obj = analysis.object_id(pb).unwrap();

    let mut r_pts = pts(&analysis, r);
    r_pts.sort_unstable();
    let mut want = vec![a_obj, b_obj];
    want.sort_unstable();
    assert_eq!(r_pts, want);
    assert_eq!(analysis.alias(r, pa), AliasResult::MayAlias);
    assert_eq!(analysis.alias(pa, pb), AliasResult::NoAlias);
}

// void (*fp)(int*); fp = f; if (c) fp = g; fp(&x);
#[test]
fn s3_indirect_call() {
    let mut m = ir::Module::new();

    let f_param = m.make_value("f.x", Type::Ptr);
    let f = m.declare_function("f", vec![f_param], false);
    let fb = m.functions[f].entry;
    m.push_inst(f, fb, Inst::Ret { arg: None });

    let g_param = m.make_value("g.x", Type::Ptr);
    let g = m.declare_function("g", vec![g_param], false);
    let gb = m.functions[g].entry;
    m.push_inst(g, gb, Inst::Ret { arg: None });

    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    let fp = m.make_value("fp", Type::Ptr);
    let px = m.make_value("px", Type::Ptr);
    let f_val = m.functions[f].value;
    let g_val = m.functions[g].value;

    m.push_inst(main, b, Inst::Alloc { dst: px, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Copy { dst: fp, src: f_val });
    m.push_inst(main, b, Inst::Copy { dst: fp, src: g_val });
    m.push_inst(main, b, Inst::Call {
        dst: None,
        callee: Callee::Indirect(fp),
        args: vec![px],
    });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let x_obj = analysis.object_id(px).unwrap();
    assert!(pts(&analysis, f_param).contains(&x_obj));
    assert!(pts(&analysis, g_param).contains(&x_obj));
}

// struct S { int *a; int *b; } s; s.a = &x; s.b = &y;
#[test]
fn s4_field_sensitivity() {
    let mut m = ir::Module::new();
    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;

    let ps = m.make_value("ps", Type::Ptr);
    let f0 = m.make_value("f0", Type::Ptr);
    let f1 = m.make_value("f1", Type::Ptr);
    let px = m.make_value("px", Type::Ptr);
    let py = m.make_value("py", Type::Ptr);

    m.push_inst(main, b, Inst::Alloc { dst: ps, fields: 2, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: px, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: py, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Gep { dst: f0, src: ps, offset: 0 });
    m.push_inst(main, b, Inst::Gep { dst: f1, src: ps, offset: 1 });
    m.push_inst(main, b, Inst::Store { dst: f0, src: px });
    m.push_inst(main, b, Inst::Store { dst: f1, src: py });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let s_obj = analysis.object_id(ps).unwrap();
    let x_obj = analysis.object_id(px).unwrap();
    let y_obj = analysis.object_id(py).unwrap();

    assert_eq!(analysis.contents(s_obj, 0).collect::<Vec<_>>(), vec![x_obj]);
    assert_eq!(analysis.contents(s_obj, 1).collect::<Vec<_>>(), vec![y_obj]);
    assert_eq!(analysis.alias(f0, py), AliasResult::NoAlias);
    assert_eq!(analysis.alias(f0, f1), AliasResult::NoAlias);
}

// p = q; r = *p — after the offline merge p and q share a representative.
#[test]
fn s5_load_through_merged_copy() {
    let mut m = ir::Module::new();
    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;

    let q = m.make_value("q", Type::Ptr);
    let p = m.make_value("p", Type::Ptr);
    let w = m.make_value("w", Type::Ptr);
    let r = m.make_value("r", Type::Ptr);

    m.push_inst(main, b, Inst::Alloc { dst: q, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: w, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Store { dst: q, src: w });
    m.push_inst(main, b, Inst::Copy { dst: p, src: q });
    m.push_inst(main, b, Inst::Load { dst: r, src: p });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    assert_eq!(analysis.value_id(p), analysis.value_id(q));
    let w_obj = analysis.object_id(w).unwrap();
    assert_eq!(pts(&analysis, r), vec![w_obj]);
}

// A call to an external function with no summary widens to the universal
// set.
#[test]
fn s6_external_unmodeled() {
    let mut m = ir::Module::new();
    let mystery_param = m.make_value("mystery.arg", Type::Ptr);
    let mystery = m.declare_function("mystery", vec![mystery_param], true);

    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    let px = m.make_value("px", Type::Ptr);
    let d = m.make_value("d", Type::Ptr);
    let r = m.make_value("r", Type::Ptr);
    let other = m.make_value("other", Type::Ptr);

    m.push_inst(main, b, Inst::Alloc { dst: px, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: other, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Call {
        dst: Some(d),
        callee: Callee::Direct(mystery),
        args: vec![px],
    });
    m.push_inst(main, b, Inst::Load { dst: r, src: px });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    assert!(pts(&analysis, d).contains(&ObjectId::UNIVERSAL_VALUE));
    // The pointed-to slot was widened, so loads through it answer
    // may-alias against everything.
    assert!(pts(&analysis, r).contains(&ObjectId::UNIVERSAL_VALUE));
    assert_eq!(analysis.alias(d, other), AliasResult::MayAlias);
    assert_eq!(analysis.alias(r, other), AliasResult::MayAlias);
}

// Heap objects are never strongly updated: two stores through the same
// malloc'd slot accumulate.
#[test]
fn heap_stores_are_weak() {
    let mut m = ir::Module::new();
    let malloc = m.declare_function("malloc", vec![], true);

    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    let h = m.make_value("h", Type::Ptr);
    let pa = m.make_value("pa", Type::Ptr);
    let pb = m.make_value("pb", Type::Ptr);
    let r = m.make_value("r", Type::Ptr);

    m.push_inst(main, b, Inst::Call {
        dst: Some(h),
        callee: Callee::Direct(malloc),
        args: vec![],
    });
    m.push_inst(main, b, Inst::Alloc { dst: pa, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: pb, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Store { dst: h, src: pa });
    m.push_inst(main, b, Inst::Store { dst: h, src: pb });
    m.push_inst(main, b, Inst::Load { dst: r, src: h });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let a_obj = analysis.object_id(pa).unwrap();
    let b_obj = analysis.object_id(pb).unwrap();
    let r_pts = pts(&analysis, r);
    assert!(r_pts.contains(&a_obj));
    assert!(r_pts.contains(&b_obj));
}

// Direct calls flow arguments into parameters and returns back out.
#[test]
fn direct_call_splicing() {
    let mut m = ir::Module::new();

    let id_param = m.make_value("id.p", Type::Ptr);
    let id_fn = m.declare_function("id", vec![id_param], false);
    let ib = m.functions[id_fn].entry;
    m.push_inst(id_fn, ib, Inst::Ret { arg: Some(id_param) });

    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    let px = m.make_value("px", Type::Ptr);
    let d = m.make_value("d", Type::Ptr);

    m.push_inst(main, b, Inst::Alloc { dst: px, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Call {
        dst: Some(d),
        callee: Callee::Direct(id_fn),
        args: vec![px],
    });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let x_obj = analysis.object_id(px).unwrap();
    assert!(pts(&analysis, d).contains(&x_obj));
    assert_eq!(analysis.alias(d, px), AliasResult::MayAlias);
}

// Global initializers take effect before main.
#[test]
fn global_initializer_flows() {
    let mut m = ir::Module::new();
    let target = m.make_value("target", Type::Ptr);
    m.globals.push(ir::Global {
        value: target,
        fields: 1,
        init: Vec::new(),
    });
    let g = m.make_value("g", Type::Ptr);
    m.globals.push(ir::Global {
        value: g,
        fields: 1,
        init: vec![(0, ir::GlobalInit::Address(target))],
    });

    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    let r = m.make_value("r", Type::Ptr);
    m.push_inst(main, b, Inst::Load { dst: r, src: g });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let target_obj = analysis.object_id(target).unwrap();
    assert_eq!(pts(&analysis, r), vec![target_obj]);
}

// An opaque initializer is the UnknownConstExpr failure; the degraded
// analysis still answers queries.
#[test]
fn opaque_initializer_is_fatal_and_degrades() {
    let mut m = ir::Module::new();
    let g = m.make_value("g", Type::Ptr);
    m.globals.push(ir::Global {
        value: g,
        fields: 1,
        init: vec![(0, ir::GlobalInit::Opaque("inline asm".to_string()))],
    });
    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    m.push_inst(main, b, Inst::Ret { arg: None });

    let err = Context::new(Flags::default()).analyze(&m);
    assert!(err.is_err());

    let analysis = Analysis::degraded();
    assert_eq!(analysis.alias(g, g), AliasResult::MayAlias);
}

// Property: alias is symmetric, and NoAlias implies the visible points-to
// sets are disjoint (ignoring the null object).
#[test]
fn alias_symmetry_and_conservativeness() {
    let mut m = ir::Module::new();
    let main = m.declare_function("main", vec![], false);
    let b0 = m.functions[main].entry;
    let b1 = m.add_block(main);
    let b2 = m.add_block(main);
    let b3 = m.add_block(main);

    let pp = m.make_value("pp", Type::Ptr);
    let pa = m.make_value("pa", Type::Ptr);
    let pb = m.make_value("pb", Type::Ptr);
    let q = m.make_value("q", Type::Ptr);
    let r = m.make_value("r", Type::Ptr);

    m.push_inst(main, b0, Inst::Alloc { dst: pp, fields: 1, heap: false });
    m.push_inst(main, b0, Inst::Alloc { dst: pa, fields: 1, heap: false });
    m.push_inst(main, b0, Inst::Alloc { dst: pb, fields: 1, heap: false });
    m.add_block_edge(main, b0, b1);
    m.add_block_edge(main, b0, b2);
    m.push_inst(main, b1, Inst::Store { dst: pp, src: pa });
    m.add_block_edge(main, b1, b3);
    m.push_inst(main, b2, Inst::Store { dst: pp, src: pb });
    m.add_block_edge(main, b2, b3);
    m.push_inst(main, b3, Inst::Copy { dst: q, src: pa });
    m.push_inst(main, b3, Inst::Load { dst: r, src: pp });
    m.push_inst(main, b3, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let values = [pp, pa, pb, q, r];
    for &x in &values {
        for &y in &values {
            assert_eq!(analysis.alias(x, y), analysis.alias(y, x));
            if analysis.alias(x, y) == AliasResult::NoAlias {
                let xs: Vec<_> = analysis.points_to(x).collect();
                let ys: Vec<_> = analysis.points_to(y).collect();
                for o in xs {
                    if o != ObjectId::NULL_OBJECT {
                        assert!(!ys.contains(&o), "NoAlias with common object {}", o);
                    }
                }
            }
        }
    }
}

// With do_spec, the dynamic profile narrows indirect targets below what
// the auxiliary analysis reports.
#[test]
fn speculative_profile_restricts_indirect_targets() {
    struct Profile {
        fp: ir::Value,
        targets: Vec<ir::FuncId>,
    }
    impl ir::IndirFunctionInfo for Profile {
        fn targets(&self, fp: ir::Value) -> Option<&[ir::FuncId]> {
            if fp == self.fp {
                Some(&self.targets)
            } else {
                None
            }
        }
    }

    let mut m = ir::Module::new();
    let f_param = m.make_value("f.x", Type::Ptr);
    let f = m.declare_function("f", vec![f_param], false);
    let fb = m.functions[f].entry;
    m.push_inst(f, fb, Inst::Ret { arg: None });

    let g_param = m.make_value("g.x", Type::Ptr);
    let g = m.declare_function("g", vec![g_param], false);
    let gb = m.functions[g].entry;
    m.push_inst(g, gb, Inst::Ret { arg: None });

    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    let fp = m.make_value("fp", Type::Ptr);
    let px = m.make_value("px", Type::Ptr);
    let f_val = m.functions[f].value;
    let g_val = m.functions[g].value;
    m.push_inst(main, b, Inst::Alloc { dst: px, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Copy { dst: fp, src: f_val });
    m.push_inst(main, b, Inst::Copy { dst: fp, src: g_val });
    m.push_inst(main, b, Inst::Call {
        dst: None,
        callee: Callee::Indirect(fp),
        args: vec![px],
    });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let profile = Profile {
        fp,
        targets: vec![f],
    };
    let mut flags = Flags::default();
    flags.do_spec = true;
    let analysis = Context::new(flags)
        .analyze_with(&m, &sparseflow::ir::AllUsed, Some(&profile))
        .expect("analysis succeeds");

    let x_obj = analysis.object_id(px).unwrap();
    assert!(pts(&analysis, f_param).contains(&x_obj));
    // The profile excluded g, so its parameter sees nothing.
    assert!(!pts(&analysis, g_param).contains(&x_obj));
}

// Loading through a non-pointer is malformed IR.
#[test]
fn load_through_non_pointer_is_malformed() {
    let mut m = ir::Module::new();
    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    let n = m.make_value("n", Type::Int);
    let r = m.make_value("r", Type::Ptr);
    m.push_inst(main, b, Inst::Load { dst: r, src: n });
    m.push_inst(main, b, Inst::Ret { arg: None });

    match Context::new(Flags::default()).analyze(&m) {
        Err(sparseflow::AnalysisError::IrMalformed(_)) => {}
        other => panic!("expected IrMalformed, got {:?}", other.map(|_| ())),
    }
}

// The load/store operand sweep: every load pointer against every store
// pointer, both directions, with no must-alias ever produced.
#[test]
fn load_store_pair_sweep() {
    let mut m = ir::Module::new();
    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;

    let pp = m.make_value("pp", Type::Ptr);
    let qq = m.make_value("qq", Type::Ptr);
    let pa = m.make_value("pa", Type::Ptr);
    let pb = m.make_value("pb", Type::Ptr);
    let r1 = m.make_value("r1", Type::Ptr);
    let r2 = m.make_value("r2", Type::Ptr);

    m.push_inst(main, b, Inst::Alloc { dst: pp, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: qq, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: pa, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: pb, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Store { dst: pp, src: pa });
    m.push_inst(main, b, Inst::Store { dst: qq, src: pb });
    m.push_inst(main, b, Inst::Load { dst: r1, src: pp });
    m.push_inst(main, b, Inst::Load { dst: r2, src: qq });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let analysis = analyze(&m);
    let loads = [pp, qq];
    let stores = [pp, qq];
    let mut no_alias = 0;
    let mut may_alias = 0;
    for &l in &loads {
        for &s in &stores {
            let fwd = analysis.alias(l, s);
            assert_eq!(fwd, analysis.alias(s, l));
            match fwd {
                AliasResult::NoAlias => no_alias += 1,
                AliasResult::MayAlias => may_alias += 1,
            }
        }
    }
    // The two distinct slots never alias; each pointer aliases itself.
    assert_eq!(no_alias, 2);
    assert_eq!(may_alias, 2);
}

// Property: the flow-sensitive answer never exceeds what two analyses of
// the same program report; re-running the whole pipeline is deterministic.
#[test]
fn analysis_is_deterministic() {
    let mut m = ir::Module::new();
    let main = m.declare_function("main", vec![], false);
    let b = m.functions[main].entry;
    let pp = m.make_value("pp", Type::Ptr);
    let pa = m.make_value("pa", Type::Ptr);
    let r = m.make_value("r", Type::Ptr);
    m.push_inst(main, b, Inst::Alloc { dst: pp, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Alloc { dst: pa, fields: 1, heap: false });
    m.push_inst(main, b, Inst::Store { dst: pp, src: pa });
    m.push_inst(main, b, Inst::Load { dst: r, src: pp });
    m.push_inst(main, b, Inst::Ret { arg: None });

    let first = analyze(&m);
    let second = analyze(&m);
    for &v in &[pp, pa, r] {
        let a: Vec<_> = first.points_to(v).collect();
        let b: Vec<_> = second.points_to(v).collect();
        assert_eq!(a, b);
    }
}
