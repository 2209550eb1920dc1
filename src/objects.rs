//! The object map: the dense id space shared by values and memory objects.
//!
//! Every pointer-typed SSA value, every allocation site, global, and
//! function, and a handful of synthetic objects get an `ObjectId`. The map
//! is append-only once identification has run; the only later mutation is
//! the representative table the pointer-equivalence optimization fills in
//! when it merges top-level values.

use crate::ir;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// An opaque reference to a value or memory object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);
entity_impl!(ObjectId, "o");

impl ObjectId {
    /// The null pointer value.
    pub const NULL_VALUE: ObjectId = ObjectId(0);
    /// The object the null pointer points to.
    pub const NULL_OBJECT: ObjectId = ObjectId(1);
    /// Integers cast to pointers.
    pub const INT_VALUE: ObjectId = ObjectId(2);
    /// The universal set: points to anything reachable. Absorbs unknown
    /// external effects.
    pub const UNIVERSAL_VALUE: ObjectId = ObjectId(3);
    /// The C library's `errno` storage.
    pub const ERRNO_OBJECT: ObjectId = ObjectId(4);
    /// The C library's locale storage.
    pub const LOCALE_OBJECT: ObjectId = ObjectId(5);
    /// The C library's character-classification tables.
    pub const CTYPE_OBJECT: ObjectId = ObjectId(6);
    /// Pthread thread-specific storage.
    pub const PTHREAD_SPECIFIC_VALUE: ObjectId = ObjectId(7);
    /// The `argv` parameter of `main`.
    pub const ARGV_VALUE: ObjectId = ObjectId(8);
    /// The strings `argv` points to.
    pub const ARGV_OBJECT: ObjectId = ObjectId(9);

    /// Number of reserved synthetic ids at the bottom of the space.
    pub const RESERVED: u32 = 10;

    /// Is this one of the reserved synthetic ids?
    pub fn is_special(self) -> bool {
        self.0 < Self::RESERVED
    }

    /// The id `offs` slots above this one.
    pub fn offset(self, offs: u32) -> ObjectId {
        ObjectId(self.0 + offs)
    }
}

/// What kind of allocation an object stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocKind {
    /// A global variable.
    Global,
    /// A stack slot.
    Stack,
    /// A heap allocation site. Summarizes arbitrarily many runtime
    /// objects, so never eligible for strong updates.
    Heap,
    /// A function's address.
    Function,
}

#[derive(Clone, Debug)]
enum IdKind {
    Special,
    Value(ir::Value),
    Object {
        alloc: AllocKind,
        // First id of the aggregate this id belongs to.
        base: ObjectId,
        // Fields remaining in the aggregate starting from this id.
        remaining: u32,
    },
    Return(ir::FuncId),
    // A value with no IR backing, created while lowering initializers and
    // external summaries.
    Temp,
}

#[derive(Clone, Debug)]
struct IdInfo {
    kind: IdKind,
    name: String,
}

/// Side table recording, for every id inside an aggregate's range, how many
/// fields remain from it. Scalars do not appear.
pub type StructInfo = HashMap<ObjectId, u32>;

/// The append-only id space plus the representative table.
pub struct ObjectMap {
    info: Vec<IdInfo>,
    value_ids: HashMap<ir::Value, ObjectId>,
    object_ids: HashMap<ir::Value, ObjectId>,
    ret_ids: HashMap<ir::FuncId, ObjectId>,
    functions: HashMap<ObjectId, ir::FuncId>,
    structs: StructInfo,
    reps: HashMap<ObjectId, ObjectId>,
    pinned: HashSet<ObjectId>,
}

impl ObjectMap {
    /// Create a map holding only the reserved synthetics.
    pub fn new() -> Self {
        let special_names = [
            "null",
            "null-object",
            "int",
            "universal",
            "errno",
            "locale",
            "ctype",
            "pthread-specific",
            "argv",
            "argv-object",
        ];
        let info = special_names
            .iter()
            .map(|&name| IdInfo {
                kind: IdKind::Special,
                name: name.to_string(),
            })
            .collect();
        Self {
            info,
            value_ids: HashMap::new(),
            object_ids: HashMap::new(),
            ret_ids: HashMap::new(),
            functions: HashMap::new(),
            structs: StructInfo::new(),
            reps: HashMap::new(),
            pinned: HashSet::new(),
        }
    }

    fn push(&mut self, kind: IdKind, name: String) -> ObjectId {
        let id = ObjectId(self.info.len() as u32);
        self.info.push(IdInfo { kind, name });
        id
    }

    /// Total number of issued ids.
    pub fn len(&self) -> usize {
        self.info.len()
    }

    /// Is `id` a valid, issued id?
    pub fn is_valid(&self, id: ObjectId) -> bool {
        (id.0 as usize) < self.info.len()
    }

    /// The top-level id for the value `v`, creating it on first use.
    pub fn get_or_make_value(&mut self, v: ir::Value, name: &str) -> ObjectId {
        if let Some(&id) = self.value_ids.get(&v) {
            return id;
        }
        let id = self.push(IdKind::Value(v), name.to_string());
        self.value_ids.insert(v, id);
        id
    }

    /// The top-level id for the value `v`, if one was identified.
    pub fn value_id(&self, v: ir::Value) -> Option<ObjectId> {
        self.value_ids.get(&v).copied()
    }

    /// Create the object behind the allocating value `v`, reserving one id
    /// per field (at least one).
    pub fn make_object(
        &mut self,
        v: ir::Value,
        alloc: AllocKind,
        fields: u32,
        name: &str,
    ) -> ObjectId {
        debug_assert!(!self.object_ids.contains_key(&v));
        let fields = fields.max(1);
        let base = ObjectId(self.info.len() as u32);
        for i in 0..fields {
            let field_name = if fields == 1 {
                name.to_string()
            } else {
                format!("{}.{}", name, i)
            };
            self.push(
                IdKind::Object {
                    alloc,
                    base,
                    remaining: fields - i,
                },
                field_name,
            );
            if fields > 1 {
                self.structs.insert(base.offset(i), fields - i);
            }
        }
        self.object_ids.insert(v, base);
        base
    }

    /// The object behind the allocating value `v`, if any.
    pub fn object_id(&self, v: ir::Value) -> Option<ObjectId> {
        self.object_ids.get(&v).copied()
    }

    /// The id of `func`'s return slot, creating it on first use.
    pub fn get_or_make_return(&mut self, func: ir::FuncId, name: &str) -> ObjectId {
        if let Some(&id) = self.ret_ids.get(&func) {
            return id;
        }
        let id = self.push(IdKind::Return(func), format!("{}.ret", name));
        self.ret_ids.insert(func, id);
        id
    }

    /// Create a value with no IR backing. Used for the intermediate values
    /// of lowered global initializers and external summaries.
    pub fn make_temp(&mut self, name: &str) -> ObjectId {
        self.push(IdKind::Temp, name.to_string())
    }

    /// Pin `id`: definitions for it may still arrive after the offline
    /// optimization (function parameters, return slots, results of calls
    /// not yet resolved), so an empty label must not retire it.
    pub fn pin(&mut self, id: ObjectId) {
        self.pinned.insert(id);
    }

    /// Is `id` pinned?
    pub fn is_pinned(&self, id: ObjectId) -> bool {
        self.pinned.contains(&id)
    }

    /// Record that `obj` is the address object of `func`.
    pub fn set_function(&mut self, obj: ObjectId, func: ir::FuncId) {
        self.functions.insert(obj, func);
    }

    /// If `obj` is a function's address object, the function.
    pub fn function_of(&self, obj: ObjectId) -> Option<ir::FuncId> {
        self.functions.get(&obj).copied()
    }

    /// Is `id` a memory object (as opposed to a top-level value)?
    pub fn is_object(&self, id: ObjectId) -> bool {
        match self.info[id.0 as usize].kind {
            IdKind::Object { .. } => true,
            _ => false,
        }
    }

    /// Fields remaining in the aggregate starting at `id`, or `None` when
    /// `id` is not part of an aggregate.
    pub fn fields_remaining(&self, id: ObjectId) -> Option<u32> {
        self.structs.get(&id).copied()
    }

    /// A copy of the aggregate side table, for the def-use graph to own.
    pub fn struct_info(&self) -> StructInfo {
        self.structs.clone()
    }

    /// Whether a store whose pointer resolves to exactly `{id}` may replace
    /// the previous contents instead of widening them. Requires a
    /// non-special, single-field object that is not a heap site (a heap
    /// site summarizes many runtime objects) and not a function.
    pub fn strong_update_ok(&self, id: ObjectId) -> bool {
        if id.is_special() {
            return false;
        }
        match self.info[id.0 as usize].kind {
            IdKind::Object {
                alloc,
                base,
                remaining,
            } => {
                base == id
                    && remaining == 1
                    && match alloc {
                        AllocKind::Global | AllocKind::Stack => true,
                        AllocKind::Heap | AllocKind::Function => false,
                    }
            }
            _ => false,
        }
    }

    /// Follow the representative chain of `id` to its canonical id.
    pub fn rep(&self, id: ObjectId) -> ObjectId {
        let mut cur = id;
        while let Some(&next) = self.reps.get(&cur) {
            cur = next;
        }
        cur
    }

    /// Record that `other` is represented by `rep` from now on. Only
    /// values merge; objects and synthetics never do.
    pub fn merge_into(&mut self, rep: ObjectId, other: ObjectId) {
        debug_assert!(!self.is_object(other) && !other.is_special());
        let rep = self.rep(rep);
        let other = self.rep(other);
        if rep != other {
            self.reps.insert(other, rep);
        }
    }

    /// The debug name of `id`.
    pub fn name(&self, id: ObjectId) -> &str {
        &self.info[id.0 as usize].name
    }
}

impl fmt::Debug for ObjectMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectMap({} ids)", self.info.len())
    }
}
