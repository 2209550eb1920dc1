//! The pointer IR the analysis consumes.
//!
//! The embedding lowers its real program representation into this minimal
//! form: functions of blocks of instructions, where every instruction is
//! already classified into the handful of shapes the analysis cares about
//! (allocation, copy, phi, field offset, load, store, call, return).
//! Values are dense references carrying a name and whether they are
//! pointer-typed; everything else about the source types is irrelevant
//! here.

use crate::entity::PrimaryMap;

/// An opaque reference to an SSA value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An opaque reference to a function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u32);
entity_impl!(FuncId, "f");

/// An opaque reference to a basic block within a function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// The only type distinction the analysis needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    /// Not a pointer.
    Int,
    /// A pointer.
    Ptr,
}

/// Per-value information.
#[derive(Clone, Debug)]
pub struct ValueData {
    /// Human-readable name, used in debug output only.
    pub name: String,
    /// The value's type.
    pub ty: Type,
}

/// A whole program.
pub struct Module {
    /// All values in the program.
    pub values: PrimaryMap<Value, ValueData>,
    /// All functions in the program.
    pub functions: PrimaryMap<FuncId, Function>,
    /// All global variables in the program.
    pub globals: Vec<Global>,
}

/// A global variable: an object of `fields` slots plus its initializer.
pub struct Global {
    /// The pointer value naming the global.
    pub value: Value,
    /// Number of fields the global's object reserves (1 for scalars).
    pub fields: u32,
    /// Constant initializers, one per initialized field.
    pub init: Vec<(u32, GlobalInit)>,
}

/// A constant initializer expression for one field of a global.
pub enum GlobalInit {
    /// A null (or undef) pointer.
    Null,
    /// The address of the object behind another global or function value.
    Address(Value),
    /// The address of a field of the object behind another global value.
    AddressOffset(Value, u32),
    /// An integer cast to a pointer.
    Int,
    /// A constant expression the analysis does not model. Fatal.
    Opaque(String),
}

/// A function: parameters and a body of blocks, or an external declaration.
pub struct Function {
    /// Function name, used for external summaries and debug output.
    pub name: String,
    /// The pointer value holding this function's address. Copy it to take
    /// the function's address.
    pub value: Value,
    /// Parameter values.
    pub params: Vec<Value>,
    /// The function's blocks.
    pub blocks: PrimaryMap<Block, BlockData>,
    /// The entry block. Meaningless for external declarations.
    pub entry: Block,
    /// True for declarations without a body.
    pub external: bool,
}

/// A basic block: straight-line instructions and control-flow successors.
#[derive(Default)]
pub struct BlockData {
    /// The block's instructions in order.
    pub insts: Vec<Inst>,
    /// Control-flow successors of this block.
    pub succs: Vec<Block>,
}

/// An instruction, pre-classified into the shapes the analysis models.
pub enum Inst {
    /// `dst = alloc` — an allocation site reserving `fields` slots.
    Alloc {
        /// The resulting pointer.
        dst: Value,
        /// Number of fields the allocated object reserves.
        fields: u32,
        /// True for heap allocation sites, false for stack slots.
        heap: bool,
    },
    /// `dst = src` — includes bitcasts and other value-preserving moves.
    Copy {
        /// Destination value.
        dst: Value,
        /// Source value.
        src: Value,
    },
    /// `dst = phi(srcs)`.
    Phi {
        /// Destination value.
        dst: Value,
        /// One source per incoming control-flow edge.
        srcs: Vec<Value>,
    },
    /// `dst = &src[offset]` — field offset into the pointed-to object.
    Gep {
        /// Destination value.
        dst: Value,
        /// Base pointer.
        src: Value,
        /// Field offset.
        offset: u32,
    },
    /// `dst = *src`.
    Load {
        /// Destination value.
        dst: Value,
        /// Pointer loaded through.
        src: Value,
    },
    /// `*dst = src`.
    Store {
        /// Pointer stored through.
        dst: Value,
        /// Value stored.
        src: Value,
    },
    /// A call, direct or through a function pointer.
    Call {
        /// The call's result value, if any.
        dst: Option<Value>,
        /// What is being called.
        callee: Callee,
        /// Argument values.
        args: Vec<Value>,
    },
    /// Return from the enclosing function.
    Ret {
        /// The returned value, if any.
        arg: Option<Value>,
    },
}

/// The callee of a call instruction.
pub enum Callee {
    /// A known function.
    Direct(FuncId),
    /// A function pointer value.
    Indirect(Value),
}

impl Module {
    /// Create an empty module.
    pub fn new() -> Self {
        Self {
            values: PrimaryMap::new(),
            functions: PrimaryMap::new(),
            globals: Vec::new(),
        }
    }

    /// Create a new value.
    pub fn make_value(&mut self, name: &str, ty: Type) -> Value {
        self.values.push(ValueData {
            name: name.to_string(),
            ty,
        })
    }

    /// Is `v` pointer-typed?
    pub fn is_pointer(&self, v: Value) -> bool {
        self.values[v].ty == Type::Ptr
    }

    /// Declare a function. Internal functions get an empty entry block to
    /// start from; externals have no body.
    pub fn declare_function(&mut self, name: &str, params: Vec<Value>, external: bool) -> FuncId {
        let value = self.make_value(name, Type::Ptr);
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BlockData::default());
        self.functions.push(Function {
            name: name.to_string(),
            value,
            params,
            blocks,
            entry,
            external,
        })
    }

    /// Look a function up by name.
    pub fn function_named(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
    }

    /// Add a block to `func`.
    pub fn add_block(&mut self, func: FuncId) -> Block {
        self.functions[func].blocks.push(BlockData::default())
    }

    /// Append an instruction to `block` of `func`.
    pub fn push_inst(&mut self, func: FuncId, block: Block, inst: Inst) {
        self.functions[func].blocks[block].insts.push(inst);
    }

    /// Record the control-flow edge `from → to` inside `func`.
    pub fn add_block_edge(&mut self, func: FuncId, from: Block, to: Block) {
        let succs = &mut self.functions[func].blocks[from].succs;
        if !succs.contains(&to) {
            succs.push(to);
        }
    }
}

/// Dead-code information from the embedding: which functions and blocks are
/// ever executed. The analysis skips unused code entirely.
pub trait UnusedFunctions {
    /// Is `func` ever used?
    fn is_used(&self, func: FuncId) -> bool;
    /// Is `block` of `func` ever executed?
    fn is_block_used(&self, func: FuncId, block: Block) -> bool;
}

/// The conservative default: everything is used.
pub struct AllUsed;

impl UnusedFunctions for AllUsed {
    fn is_used(&self, _func: FuncId) -> bool {
        true
    }
    fn is_block_used(&self, _func: FuncId, _block: Block) -> bool {
        true
    }
}

/// Dynamically observed indirect-call targets, keyed by the call's function
/// pointer value. Consulted only under the `do_spec` flag.
pub trait IndirFunctionInfo {
    /// The observed callees for calls through `fp`, or `None` when the
    /// profile has no information about this pointer.
    fn targets(&self, fp: Value) -> Option<&[FuncId]>;
}
