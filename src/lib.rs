/*!
In-memory construction of SPIR-V IR.

This crate is the IR-construction layer of a shader-to-SPIR-V compiler
backend: it turns a sequence of construction requests from a front end (emit
this arithmetic op, emit this image sample, open this basic block, branch
here) into a graph of typed instruction nodes organized into basic blocks,
functions, and a [`Module`], ready for a later numbering/serialization pass
to emit the binary instruction stream.

The pieces fit together like this:

- A [`Context`] owns every node ever allocated, in [`Arena`]s indexed by
  [`Handle`]s. Nodes are never freed individually.
- [`Instruction`] is the node type: a result-type descriptor, a source
  [`Span`], a numeric identity that stays unassigned until the downstream
  numbering pass runs, and an [`Operation`] carrying the operand references.
- [`Function`] and [`BasicBlock`] are the containers; a [`Module`] is the
  ordered list of finished functions plus the module-wide [`CapabilitySet`].
- [`Builder`](builder::Builder) is the stateful API that drives all of the
  above. See the [`builder`] module for the construction discipline.

The builder never walks or validates the resulting graph; it only appends.
Module-level well-formedness (block ordering, dominance of merge blocks) is
the concern of later passes.
*/

pub mod arena;
pub mod builder;

pub use arena::{Arena, BadHandle, Handle};
pub use builder::Builder;

use spirv::Word;

/// Hash-set that is faster than the standard one, with a deterministic
/// iteration order.
pub type FastIndexSet<K> =
    indexmap::IndexSet<K, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// A source-location tag attached to nodes for diagnostics.
///
/// The builder never inspects spans; it only carries them. The meaning of
/// the offsets is owned by the front end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    start: u32,
    end: u32,
}

impl Span {
    pub const UNDEFINED: Self = Span { start: 0, end: 0 };

    pub const fn new(start: u32, end: u32) -> Self {
        Span { start, end }
    }

    /// Whether this span refers to an actual source location.
    pub fn is_defined(&self) -> bool {
        *self != Self::UNDEFINED
    }
}

/// An opaque reference to a semantic type descriptor.
///
/// Type descriptors are owned by the type subsystem, an external
/// collaborator; the builder attaches them to nodes without ever looking
/// inside.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef(u32);

impl TypeRef {
    pub const fn from_raw(token: u32) -> Self {
        TypeRef(token)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// The boundary to the type-description subsystem.
///
/// The builder consults it in exactly three places: resolving the capability
/// a storable image requires for reads and writes, and obtaining the types
/// it needs to split a sparse access result into its status and texel parts.
pub trait TypeContext {
    /// The capability a module must declare to read or write a storage image
    /// of the given type.
    fn storage_image_capability(&self, image: TypeRef) -> spirv::Capability;

    /// The unsigned 32-bit integer type, carried by sparse residency status
    /// values.
    fn uint_type(&self) -> TypeRef;

    /// The boolean type, produced by residency tests.
    fn bool_type(&self) -> TypeRef;
}

/// A literal scalar value carried by a constant node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    F32(f32),
    U32(u32),
    I32(i32),
}

/// The module-wide set of optional capabilities.
///
/// Grows monotonically as instructions that need optional features are
/// constructed; requiring a capability twice has no additional effect, and
/// nothing is ever removed.
#[derive(Debug, Default)]
pub struct CapabilitySet {
    used: FastIndexSet<spirv::Capability>,
}

impl CapabilitySet {
    /// Record that the module uses `capability`. Idempotent.
    pub fn require(&mut self, capability: spirv::Capability) {
        self.used.insert(capability);
    }

    pub fn contains(&self, capability: spirv::Capability) -> bool {
        self.used.contains(&capability)
    }

    /// The used capabilities, in first-required order.
    pub fn iter(&self) -> impl Iterator<Item = spirv::Capability> + '_ {
        self.used.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

/// The optional operands of an image access, each independently present or
/// absent.
///
/// The gradient is a pair on purpose: a partial gradient is meaningless, so
/// both components are supplied together or not at all. See
/// [`ImageOperands::compose_mask`] for composition into the binary operand
/// mask.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImageOperands {
    pub bias: Option<Handle<Instruction>>,
    pub lod: Option<Handle<Instruction>>,
    pub grad: Option<(Handle<Instruction>, Handle<Instruction>)>,
    pub const_offset: Option<Handle<Instruction>>,
    pub offset: Option<Handle<Instruction>>,
    pub const_offsets: Option<Handle<Instruction>>,
    pub sample: Option<Handle<Instruction>>,
    pub min_lod: Option<Handle<Instruction>>,
}

/// One image access instruction: a sample, fetch, read, write, or gather.
///
/// A single shape serves every opcode in the family; the variants differ
/// only in which optional fields are populated. `mask` is the composed
/// operand mask matching `operands`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageAccess {
    pub op: spirv::Op,
    /// The image being accessed: a [`Operation::SampledImage`] combinator
    /// for sampling and gathering, a plain image otherwise.
    pub image: Handle<Instruction>,
    pub coordinate: Handle<Instruction>,
    pub mask: spirv::ImageOperands,
    /// Depth-comparison reference value, for `Dref` variants.
    pub dref: Option<Handle<Instruction>>,
    pub operands: ImageOperands,
    /// The component to gather.
    pub component: Option<Handle<Instruction>>,
    /// The value written by `OpImageWrite`.
    pub texel: Option<Handle<Instruction>>,
}

/// A `(literal, target)` pair of a switch instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwitchCase {
    pub value: u32,
    pub target: Handle<BasicBlock>,
}

/// The operation performed by an [`Instruction`], with its operand
/// references.
///
/// Operands are data dependencies: handles to nodes that were already
/// constructed. Control-flow edges reference [`BasicBlock`]s instead.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// A formal parameter of the enclosing function. Lives in
    /// [`Function::parameters`], not in a block.
    FunctionParameter,
    /// Stack-allocated storage. Lives in [`Function::variables`].
    Variable {
        storage_class: spirv::StorageClass,
        init: Option<Handle<Instruction>>,
    },
    /// A literal constant. Allocated by [`Context::constant`] outside any
    /// block; the serializer hoists constants into the module scope.
    Constant { value: Literal },

    Load {
        pointer: Handle<Instruction>,
    },
    Store {
        pointer: Handle<Instruction>,
        value: Handle<Instruction>,
    },
    CompositeConstruct {
        constituents: Vec<Handle<Instruction>>,
    },
    CompositeExtract {
        composite: Handle<Instruction>,
        indices: Vec<u32>,
    },
    CompositeInsert {
        composite: Handle<Instruction>,
        object: Handle<Instruction>,
        indices: Vec<u32>,
    },
    VectorShuffle {
        vector1: Handle<Instruction>,
        vector2: Handle<Instruction>,
        selectors: Vec<u32>,
    },
    AccessChain {
        base: Handle<Instruction>,
        indices: Vec<Handle<Instruction>>,
    },
    FunctionCall {
        function: Handle<Function>,
        arguments: Vec<Handle<Instruction>>,
    },
    /// Any single-operand opcode: conversions, negation, bit complement,
    /// image queries, derivatives.
    Unary {
        op: spirv::Op,
        operand: Handle<Instruction>,
    },
    /// Any two-operand opcode.
    Binary {
        op: spirv::Op,
        left: Handle<Instruction>,
        right: Handle<Instruction>,
    },
    /// A binary op evaluated at specialization time.
    SpecConstantBinary {
        op: spirv::Op,
        left: Handle<Instruction>,
        right: Handle<Instruction>,
    },
    Select {
        condition: Handle<Instruction>,
        accept: Handle<Instruction>,
        reject: Handle<Instruction>,
    },

    GroupNonUniformElect {
        exec_scope: spirv::Scope,
    },
    GroupNonUniformUnary {
        op: spirv::Op,
        exec_scope: spirv::Scope,
        group_op: Option<spirv::GroupOperation>,
        operand: Handle<Instruction>,
    },
    GroupNonUniformBinary {
        op: spirv::Op,
        exec_scope: spirv::Scope,
        left: Handle<Instruction>,
        right: Handle<Instruction>,
    },

    /// An atomic read-modify-write. Compare-exchange is the same shape with
    /// `unequal_semantics` and `comparator` populated.
    Atomic {
        op: spirv::Op,
        pointer: Handle<Instruction>,
        scope: spirv::Scope,
        semantics: spirv::MemorySemantics,
        unequal_semantics: Option<spirv::MemorySemantics>,
        value: Handle<Instruction>,
        comparator: Option<Handle<Instruction>>,
    },
    /// A pointer to a single texel, for atomic image access.
    ImageTexelPointer {
        image: Handle<Instruction>,
        coordinate: Handle<Instruction>,
        sample: Handle<Instruction>,
    },

    /// The combinator joining an image and a sampler, required before any
    /// sampling or gathering operation.
    SampledImage {
        image: Handle<Instruction>,
        sampler: Handle<Instruction>,
    },
    Image(ImageAccess),
    /// Tests a previously extracted residency status code.
    ImageSparseTexelsResident {
        resident_code: Handle<Instruction>,
    },

    /// Declares where control reunifies after a structured selection. Must
    /// immediately precede its branch or switch.
    SelectionMerge {
        merge: Handle<BasicBlock>,
        control: spirv::SelectionControl,
    },
    /// Declares the merge and continue blocks of a loop. Must immediately
    /// precede the loop header's branch.
    LoopMerge {
        merge: Handle<BasicBlock>,
        continuing: Handle<BasicBlock>,
        control: spirv::LoopControl,
    },
    Branch {
        target: Handle<BasicBlock>,
    },
    BranchConditional {
        condition: Handle<Instruction>,
        accept: Handle<BasicBlock>,
        reject: Handle<BasicBlock>,
    },
    Switch {
        selector: Handle<Instruction>,
        default: Handle<BasicBlock>,
        cases: Vec<SwitchCase>,
    },
    Kill,
    Return {
        value: Option<Handle<Instruction>>,
    },

    /// A call into the `GLSL.std.450` extended instruction set.
    ExtInst {
        inst: spirv::GLOp,
        arguments: Vec<Handle<Instruction>>,
    },
    Barrier {
        memory_scope: spirv::Scope,
        semantics: spirv::MemorySemantics,
        /// Present for control barriers, absent for plain memory barriers.
        exec_scope: Option<spirv::Scope>,
    },
    BitFieldInsert {
        base: Handle<Instruction>,
        insert: Handle<Instruction>,
        offset: Handle<Instruction>,
        count: Handle<Instruction>,
    },
    BitFieldExtract {
        base: Handle<Instruction>,
        offset: Handle<Instruction>,
        count: Handle<Instruction>,
        signed: bool,
    },

    EmitVertex,
    EndPrimitive,
}

/// A single IR instruction node.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// Result type, absent for void-returning operations.
    pub ty: Option<TypeRef>,
    /// The `<id>` of this instruction in the final binary. Stays `None`
    /// until the downstream numbering pass assigns dense ids; the builder
    /// never assigns one.
    pub id: Option<Word>,
    pub span: Span,
    /// Debug name, used for parameters, variables, and nothing else.
    pub name: Option<String>,
    pub op: Operation,
}

/// A basic block: a label plus a straight-line run of instructions.
///
/// Blocks are created detached, filled in while they hold the builder's
/// insertion cursor, and attached to their function in creation order when
/// the function is closed.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    /// Label identity placeholder, assigned by the numbering pass.
    pub id: Option<Word>,
    /// Display label for diagnostics.
    pub name: String,
    /// The instruction sequence, append-only during construction.
    pub instructions: Vec<Handle<Instruction>>,
    /// Control-flow successors, recorded explicitly by the front end via
    /// [`Builder::add_successor`]; terminators do not update this.
    pub successors: Vec<Handle<BasicBlock>>,
    pub merge_target: Option<Handle<BasicBlock>>,
    pub continue_target: Option<Handle<BasicBlock>>,
}

impl BasicBlock {
    pub(crate) fn new(name: String) -> Self {
        BasicBlock {
            id: None,
            name,
            instructions: Vec::new(),
            successors: Vec::new(),
            merge_target: None,
            continue_target: None,
        }
    }

    /// Whether this block heads a loop: it carries both a merge and a
    /// continue target.
    pub fn is_loop_header(&self) -> bool {
        self.merge_target.is_some() && self.continue_target.is_some()
    }
}

/// A function under or after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub return_type: TypeRef,
    /// Identity placeholder, assigned by the numbering pass.
    pub id: Option<Word>,
    pub span: Span,
    /// Display name for debug output.
    pub name: String,
    pub control: spirv::FunctionControl,
    /// Formal parameters, in declaration order.
    pub parameters: Vec<Handle<Instruction>>,
    /// Function-scope variables, in declaration order.
    pub variables: Vec<Handle<Instruction>>,
    /// Basic blocks in creation order, populated when the function is
    /// closed. The order is not adjusted to satisfy module-level block
    /// ordering rules; that is left to later passes.
    pub blocks: Vec<Handle<BasicBlock>>,
}

/// A finished module: the sole output of this layer.
#[derive(Debug, Default)]
pub struct Module {
    /// Finished functions, in the order they were closed.
    pub functions: Vec<Handle<Function>>,
    pub capabilities: CapabilitySet,
}

/// The ownership context of one compilation unit.
///
/// Owns every function, basic block, and instruction node ever allocated.
/// There is no way to free a single node; the whole unit is released when
/// the context is dropped. Everything else holds [`Handle`]s into these
/// arenas.
#[derive(Debug, Default)]
pub struct Context {
    pub functions: Arena<Function>,
    pub blocks: Arena<BasicBlock>,
    pub instructions: Arena<Instruction>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a constant node.
    ///
    /// Constants live outside any basic block and are referenced as operands
    /// by ordinary instructions. No deduplication is attempted here; the
    /// serializer is free to unify equal constants when it hoists them.
    pub fn constant(&mut self, ty: TypeRef, value: Literal, span: Span) -> Handle<Instruction> {
        self.instructions.append(Instruction {
            ty: Some(ty),
            id: None,
            span,
            name: None,
            op: Operation::Constant { value },
        })
    }
}
