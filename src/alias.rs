//! The read-only alias-query façade over the solved points-to state.

use crate::ir;
use crate::objects::{ObjectId, ObjectMap};
use crate::ptsto::PtstoSet;
use crate::solve::Solution;

/// The answer to an alias query. Must-alias is never produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliasResult {
    /// The two pointers provably never refer to the same object.
    NoAlias,
    /// The two pointers may refer to the same object.
    MayAlias,
}

/// The final analysis result: the object map plus the solved state, or a
/// degraded shell that answers may-alias everywhere after a fatal error.
pub struct Analysis {
    omap: ObjectMap,
    solution: Option<Solution>,
}

impl Analysis {
    pub(crate) fn new(omap: ObjectMap, solution: Solution) -> Self {
        Self {
            omap,
            solution: Some(solution),
        }
    }

    /// An analysis that failed: every query answers `MayAlias`, every
    /// points-to set reads empty. Downstream passes degrade instead of
    /// crashing.
    pub fn degraded() -> Self {
        Self {
            omap: ObjectMap::new(),
            solution: None,
        }
    }

    /// Did the analysis fail?
    pub fn is_degraded(&self) -> bool {
        self.solution.is_none()
    }

    /// The top-level id of `v`, if the analysis identified it.
    pub fn value_id(&self, v: ir::Value) -> Option<ObjectId> {
        self.omap.value_id(v).map(|id| self.omap.rep(id))
    }

    /// The object allocated by `v` (a global, function, or allocation
    /// site), if any.
    pub fn object_id(&self, v: ir::Value) -> Option<ObjectId> {
        self.omap.object_id(v)
    }

    fn top_set(&self, v: ir::Value, offs: u32) -> Option<&PtstoSet> {
        let sol = self.solution.as_ref()?;
        let id = self.omap.value_id(v)?;
        sol.pts_top.get(self.omap.rep(id), offs)
    }

    /// May `p` and `q` refer to the same object?
    pub fn alias(&self, p: ir::Value, q: ir::Value) -> AliasResult {
        let (p_set, q_set) = match (self.top_set(p, 0), self.top_set(q, 0)) {
            (Some(a), Some(b)) => (a, b),
            // Defer to the conservative answer when either side is
            // untracked.
            _ => return AliasResult::MayAlias,
        };

        // An unbounded pointer may alias anything.
        if p_set.contains(ObjectId::UNIVERSAL_VALUE) || q_set.contains(ObjectId::UNIVERSAL_VALUE) {
            return AliasResult::MayAlias;
        }
        // Two sets holding nothing at all are not produced by a sound run;
        // answer conservatively.
        if p_set.is_empty() && q_set.is_empty() {
            return AliasResult::MayAlias;
        }
        if !p_set.intersects_ignoring(q_set, ObjectId::NULL_OBJECT) {
            return AliasResult::NoAlias;
        }
        AliasResult::MayAlias
    }

    /// The objects `v` may point to.
    pub fn points_to(&self, v: ir::Value) -> impl Iterator<Item = ObjectId> + '_ {
        self.points_to_at(v, 0)
    }

    /// The objects `v` may point to at field offset `k`.
    pub fn points_to_at(&self, v: ir::Value, k: u32) -> impl Iterator<Item = ObjectId> + '_ {
        self.top_set(v, k).into_iter().flat_map(|s| s.iter())
    }

    /// The values field `k` of the object `obj` may hold: the union of
    /// everything ever stored into it.
    pub fn contents(&self, obj: ObjectId, k: u32) -> impl Iterator<Item = ObjectId> + '_ {
        self.solution
            .as_ref()
            .and_then(|s| s.mem.get(&obj.offset(k)))
            .into_iter()
            .flat_map(|s| s.iter())
    }

    /// The object map, for name lookups in debug output.
    pub fn object_map(&self) -> &ObjectMap {
        &self.omap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn degraded_analysis_answers_may_alias() {
        let analysis = Analysis::degraded();
        let v0 = ir::Value::new(0);
        let v1 = ir::Value::new(1);
        assert!(analysis.is_degraded());
        assert_eq!(analysis.alias(v0, v1), AliasResult::MayAlias);
        assert_eq!(analysis.points_to(v0).count(), 0);
    }
}
