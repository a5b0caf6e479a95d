//! IL instructions
//!
//! Every instruction lives in the [`FlowGraph`](super::FlowGraph) arena and is
//! addressed by [`InstrId`]. Instructions that produce a value are also SSA
//! definitions; consumers refer to them through `inputs`. Straight-line code
//! is threaded through `next`; a block starts with an entry instruction and
//! ends with a terminator whose successors are other entries.

use crate::kernel::VariableId;
use crate::object::{ClassId, ConstValue, FfiSignature, FieldId, FunctionId, NativeType, TypeArgsId, TypeId};

use super::repr::{Representation, SmallRepresentation};
use super::slot::Slot;

/// Instruction handle (also the SSA name of its value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl std::fmt::Display for InstrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Local storage named by `LoadLocal` / `StoreLocal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalRef {
    /// A frame variable
    Variable(VariableId),
    /// An expression temporary: the value-stack slot at this depth
    Temp(usize),
}

/// Initialization state of a field store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// First store into a freshly allocated object
    Initializing,
    /// Any other store
    Other,
}

/// Whether a store needs the generational write barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreBarrier {
    /// Emit the barrier
    Emit,
    /// The stored value is never a heap object
    NoBarrier,
}

/// Comparison performed by `StrictCompare`, relational ops and branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonKind {
    /// Identity
    StrictEqual,
    /// Non-identity
    StrictNotEqual,
    /// `<` on small integers
    Less,
    /// `<=` on small integers
    LessEqual,
    /// `>` on small integers
    Greater,
    /// `>=` on small integers
    GreaterEqual,
}

impl ComparisonKind {
    /// The opposite comparison
    pub fn negate(self) -> Self {
        match self {
            ComparisonKind::StrictEqual => ComparisonKind::StrictNotEqual,
            ComparisonKind::StrictNotEqual => ComparisonKind::StrictEqual,
            ComparisonKind::Less => ComparisonKind::GreaterEqual,
            ComparisonKind::LessEqual => ComparisonKind::Greater,
            ComparisonKind::Greater => ComparisonKind::LessEqual,
            ComparisonKind::GreaterEqual => ComparisonKind::Less,
        }
    }
}

/// Integer arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
}

/// Why an `AssertAssignable` was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertKind {
    /// Parameter type check
    ParameterCheck,
    /// Implicit check inserted by the front end (casts, returns)
    InsertedByFrontend,
    /// Explicit `as` in source
    FromSource,
}

/// Entry point a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Checked entry
    Normal,
    /// Entry that skips checks the caller already proved
    Unchecked,
}

/// How a static call may be rebound after reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebindRule {
    /// Never rebound
    NoRebind,
    /// Rebound to the static target of the same name
    Static,
    /// `noSuchMethod` dispatch
    NsmDispatch,
}

/// Kind of selector an instance call uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationKind {
    /// Method call
    Method,
    /// Getter call
    Getter,
    /// Setter call
    Setter,
}

/// Instruction payload
#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    // ===== Block entries =====
    /// Root of the graph
    GraphEntry {
        /// Normal (checked) function entry
        normal_entry: Option<InstrId>,
        /// Optional unchecked function entry
        unchecked_entry: Option<InstrId>,
        /// Catch entries, reachable from any throwing instruction
        catch_entries: Vec<InstrId>,
    },
    /// Function entry block
    FunctionEntry {
        /// Block id
        block: BlockId,
    },
    /// Entry of a native-to-managed callback
    NativeEntry {
        /// Block id
        block: BlockId,
        /// Callback id of the trampoline
        callback_id: u32,
    },
    /// Block with exactly one predecessor
    TargetEntry {
        /// Block id
        block: BlockId,
        /// Enclosing try index
        try_index: Option<u32>,
    },
    /// Block with any number of predecessors
    JoinEntry {
        /// Block id
        block: BlockId,
        /// Enclosing try index
        try_index: Option<u32>,
    },
    /// Exception handler entry
    CatchEntry {
        /// Block id
        block: BlockId,
        /// Try index enclosing the handler itself
        try_index: Option<u32>,
        /// Try index of the protected region
        catch_try_index: u32,
        /// Guards of the handler (empty catches everything)
        handler_types: Vec<TypeId>,
        /// Whether the stack trace is used
        needs_stacktrace: bool,
        /// Handler synthesized by the builder, not present in source
        is_synthesized: bool,
        /// Exception variable
        exception: VariableId,
        /// Stack trace variable
        stack_trace: VariableId,
        /// Raw exception variable
        raw_exception: VariableId,
        /// Raw stack trace variable
        raw_stack_trace: VariableId,
    },

    // ===== Locals and the value stack =====
    /// Compile-time constant
    Constant(ConstValue),
    /// Incoming argument of a native callback
    NativeParameter {
        /// Argument position
        index: usize,
        /// Native representation
        repr: Representation,
    },
    /// Read a local or temporary
    LoadLocal(LocalRef),
    /// Write a local or temporary; the value stays on the stack
    StoreLocal(LocalRef),
    /// Drop temporaries, optionally keeping the top of stack
    DropTemps {
        /// Number of values removed
        count: usize,
        /// Keep the top value above the dropped ones
        preserve_top: bool,
    },
    /// Placeholder value that reserves a temporary
    MakeTemp,
    /// Pass the input as an outgoing argument
    PushArgument,

    // ===== Fields and contexts =====
    /// Load a VM-internal field
    LoadNativeField(Slot),
    /// Load a declared instance field
    LoadField(FieldId),
    /// Store into an instance field: inputs `[instance, value]`
    StoreInstanceField {
        /// Target slot
        slot: Slot,
        /// Initialization state
        kind: StoreKind,
        /// Barrier requirement
        barrier: StoreBarrier,
    },
    /// Read a static field
    LoadStaticField(FieldId),
    /// Write a static field
    StoreStaticField(FieldId),
    /// Run the static field initializer if needed
    InitStaticField(FieldId),
    /// Update the class guard of a field
    GuardFieldClass(FieldId),
    /// Update the length guard of a field
    GuardFieldLength(FieldId),
    /// Allocate a context with room for `num_variables` captured variables
    AllocateContext {
        /// Slot count
        num_variables: usize,
    },
    /// Copy the input context (loop variables that diverge per iteration)
    CloneContext {
        /// Slot count
        num_variables: usize,
    },

    // ===== Allocation =====
    /// Allocate an instance; inputs are the pushed type-argument vector, if any
    AllocateObject {
        /// Allocated class
        class: ClassId,
        /// 1 when a type-argument vector is passed
        argument_count: usize,
        /// Closure function when allocating a closure
        closure_function: Option<FunctionId>,
    },
    /// Allocate an array: inputs `[element_type_arguments, length]`
    CreateArray,
    /// Store into an array: inputs `[array, index, value]`
    StoreIndexed {
        /// Array class
        class: ClassId,
    },
    /// Class id of the input (small integers give the smi class id)
    LoadClassId,
    /// Arguments descriptor of the current invocation
    LoadArgDescriptor,
    /// Read an incoming argument slot relative to the frame pointer; the
    /// input is a word index added to the offset
    LoadFpRelativeSlot {
        /// Byte offset
        offset: i64,
    },
    /// Overwrite an incoming argument slot relative to the frame pointer;
    /// inputs are the word index and the value
    StoreFpRelativeSlot {
        /// Byte offset
        offset: i64,
    },

    // ===== Calls =====
    /// Dynamically dispatched call
    InstanceCall {
        /// Selector
        name: String,
        /// Selector kind
        kind: InvocationKind,
        /// Type arguments passed (0 when none)
        type_args_len: usize,
        /// Arguments, including the receiver and the type-argument vector
        argument_count: usize,
        /// Names of the trailing named arguments
        argument_names: Vec<String>,
        /// Arguments whose class ids feed the inline cache
        checked_argument_count: usize,
        /// Statically known target
        interface_target: Option<FunctionId>,
        /// Inferred result type
        result_type: Option<TypeId>,
        /// Entry point to call
        entry_kind: EntryKind,
        /// Static type of the receiver
        receivers_static_type: Option<TypeId>,
    },
    /// Statically bound call
    StaticCall {
        /// Callee
        target: FunctionId,
        /// Type arguments passed (0 when none)
        type_args_len: usize,
        /// Arguments, including the type-argument vector
        argument_count: usize,
        /// Names of the trailing named arguments
        argument_names: Vec<String>,
        /// Rebinding rule
        rebind: RebindRule,
        /// Result type (from the target, else from inference)
        result_type: Option<TypeId>,
        /// Entry point to call
        entry_kind: EntryKind,
    },
    /// Call through a closure's function: last input is the function
    ClosureCall {
        /// Type arguments passed (0 when none)
        type_args_len: usize,
        /// Arguments, including the closure and the type-argument vector
        argument_count: usize,
        /// Names of the trailing named arguments
        argument_names: Vec<String>,
    },
    /// Call into a VM native
    NativeCall {
        /// Native symbol
        name: String,
        /// Function the native implements
        function: FunctionId,
        /// Arguments, including the type-argument vector
        argument_count: usize,
        /// Resolve the entry on first call
        link_lazily: bool,
    },
    /// Call a foreign function: inputs are the unboxed arguments then the target address
    FfiCall {
        /// Foreign signature
        signature: FfiSignature,
        /// Native representation of each argument
        argument_reps: Vec<Representation>,
    },

    // ===== Types =====
    /// Instantiate a type: inputs `[instantiator_type_args, function_type_args]`
    InstantiateType(TypeId),
    /// Instantiate a vector: inputs `[instantiator_type_args, function_type_args]`
    InstantiateTypeArguments(TypeArgsId),
    /// Check the value is assignable: inputs `[value, instantiator, function]`
    AssertAssignable {
        /// Destination type
        dst_type: TypeId,
        /// Name used in the error message
        dst_name: String,
        /// Why the check exists
        kind: AssertKind,
    },
    /// Check `sub <: super`: inputs `[instantiator, function]`
    AssertSubtype {
        /// Subtype
        sub_type: TypeId,
        /// Supertype
        super_type: TypeId,
        /// Name used in the error message
        dst_name: String,
    },
    /// Throw unless the input is a bool
    AssertBool,
    /// `value is T`: inputs `[value, instantiator, function]`
    InstanceOf(TypeId),
    /// Throw `NoSuchMethodError` when the input is null
    CheckNull {
        /// Member named in the error
        function_name: String,
        /// Optimized null check (no deoptimization)
        optimized: bool,
    },
    /// Stack overflow and interrupt check
    CheckStackOverflow {
        /// Loop nesting depth
        loop_depth: usize,
        /// Emitted in a function prologue
        in_prologue: bool,
    },
    /// Narrow the static type of the input
    Redefinition(TypeId),

    // ===== Arithmetic and conversions =====
    /// Identity comparison producing a bool
    StrictCompare {
        /// Comparison
        kind: ComparisonKind,
        /// Numbers must be compared by value
        needs_number_check: bool,
    },
    /// Small-integer relational comparison producing a bool
    RelationalOp(ComparisonKind),
    /// Integer arithmetic on the given representation
    BinaryIntegerOp {
        /// Operator
        op: BinaryOp,
        /// Operand representation (`Tagged` for small integers)
        repr: Representation,
        /// Wrap instead of overflowing
        truncating: bool,
    },
    /// `!`
    BooleanNegate,
    /// Box an unboxed value
    Box(Representation),
    /// Unbox a managed value
    Unbox {
        /// Target representation
        to: Representation,
        /// Truncate instead of deoptimizing on overflow
        truncating: bool,
    },
    /// Convert between integer representations
    IntConverter {
        /// Source representation
        from: Representation,
        /// Target representation
        to: Representation,
    },
    /// Sign or zero extend a sub-word value
    UnboxedWidthExtender {
        /// Register representation
        repr: Representation,
        /// Stored width
        from: SmallRepresentation,
    },
    /// Reinterpret bits
    BitCast {
        /// Source representation
        from: Representation,
        /// Target representation
        to: Representation,
    },
    /// Widen an unboxed float
    FloatToDouble,
    /// Narrow an unboxed double
    DoubleToFloat,
    /// Read foreign memory: inputs `[address, index]`
    LoadIndexedTypedData(NativeType),
    /// Write foreign memory: inputs `[address, index, value]`
    StoreIndexedTypedData(NativeType),
    /// Read a raw pointer field
    LoadUntagged {
        /// Byte offset
        offset: u32,
    },
    /// Write a raw pointer field: inputs `[object, value]`
    StoreUntagged {
        /// Byte offset
        offset: u32,
    },

    // ===== Control =====
    /// Jump to a join
    Goto {
        /// Target join entry
        target: InstrId,
    },
    /// Two-way branch on a comparison of the two inputs
    Branch {
        /// Comparison
        kind: ComparisonKind,
        /// Successor when the comparison holds
        true_target: InstrId,
        /// Successor otherwise
        false_target: InstrId,
    },
    /// Return the input
    Return,
    /// Return an unboxed value to native code
    NativeReturn(Representation),
    /// Throw the input
    Throw,
    /// Rethrow: inputs `[exception, stack_trace]`
    ReThrow {
        /// Try index of the handler doing the rethrow
        catch_try_index: u32,
    },
}

impl InstrKind {
    /// Whether the instruction starts a block
    pub fn is_block_entry(&self) -> bool {
        matches!(
            self,
            InstrKind::GraphEntry { .. }
                | InstrKind::FunctionEntry { .. }
                | InstrKind::NativeEntry { .. }
                | InstrKind::TargetEntry { .. }
                | InstrKind::JoinEntry { .. }
                | InstrKind::CatchEntry { .. }
        )
    }

    /// Whether the instruction ends a block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrKind::Goto { .. }
                | InstrKind::Branch { .. }
                | InstrKind::Return
                | InstrKind::NativeReturn(_)
                | InstrKind::Throw
                | InstrKind::ReThrow { .. }
        )
    }

    /// Block id of an entry instruction
    pub fn block_id(&self) -> Option<BlockId> {
        match self {
            InstrKind::FunctionEntry { block }
            | InstrKind::NativeEntry { block, .. }
            | InstrKind::TargetEntry { block, .. }
            | InstrKind::JoinEntry { block, .. }
            | InstrKind::CatchEntry { block, .. } => Some(*block),
            InstrKind::GraphEntry { .. } => Some(BlockId(0)),
            _ => None,
        }
    }

    /// Blocks control may continue to after this instruction
    pub fn successors(&self) -> Vec<InstrId> {
        match self {
            InstrKind::GraphEntry {
                normal_entry,
                unchecked_entry,
                catch_entries,
            } => normal_entry
                .iter()
                .chain(unchecked_entry.iter())
                .chain(catch_entries.iter())
                .copied()
                .collect(),
            InstrKind::Goto { target } => vec![*target],
            InstrKind::Branch {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            _ => Vec::new(),
        }
    }

    /// Whether the instruction is a call of any kind
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            InstrKind::InstanceCall { .. }
                | InstrKind::StaticCall { .. }
                | InstrKind::ClosureCall { .. }
                | InstrKind::NativeCall { .. }
                | InstrKind::FfiCall { .. }
        )
    }

    /// Whether the instruction instantiates a type or type-argument vector
    pub fn is_instantiation(&self) -> bool {
        matches!(
            self,
            InstrKind::InstantiateType(_) | InstrKind::InstantiateTypeArguments(_)
        )
    }
}

/// An instruction node in the graph arena
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    /// Payload
    pub kind: InstrKind,
    /// Values consumed, in operand order
    pub inputs: Vec<InstrId>,
    /// Next instruction in the block
    pub next: Option<InstrId>,
    /// Deoptimization id (instructions that may deoptimize or call)
    pub deopt_id: Option<u32>,
}
