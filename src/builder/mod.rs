/*!
The stateful construction API.

A [`Builder`] is driven by the front end through a strict sequence: begin a
function, add parameters and locals, create basic blocks, position the
insertion cursor on one of them, emit instructions into it, and finally close
the function, which attaches it to the module. One function is open at a
time, and instruction emission requires a positioned cursor.

Violating that discipline is a bug in the calling code generator, not a
recoverable condition: every operation checks its preconditions first and
panics with a descriptive message before touching any state, so a violation
never leaves a half-appended node behind. Malformed *source* programs must be
rejected long before this layer is reached.

The image-operation constructors, which select among many opcode variants
and accumulate optional capabilities, live in the `image` submodule.
*/

mod image;

use crate::arena::Handle;
use crate::{
    BasicBlock, Context, Function, Instruction, Literal, Module, Operation, Span, SwitchCase,
    TypeContext, TypeRef,
};

/// Construction state: either between functions, or inside one.
enum State {
    Idle,
    Open {
        function: Handle<Function>,
        /// Blocks created since `begin_function`, in creation order. They
        /// are attached to the function only when it is closed.
        pending_blocks: Vec<Handle<BasicBlock>>,
        /// The block receiving emitted instructions, if one is positioned.
        insert_point: Option<Handle<BasicBlock>>,
    },
}

/// Builds functions, basic blocks, and instructions into a [`Module`].
///
/// The builder allocates every node from the [`Context`] it borrows, appends
/// instructions to whichever block currently holds the cursor, and records
/// the capabilities the constructed instructions require. It never inspects
/// or re-walks the graph it has built.
pub struct Builder<'a> {
    context: &'a mut Context,
    types: &'a dyn TypeContext,
    module: Module,
    state: State,
}

impl<'a> Builder<'a> {
    pub fn new(context: &'a mut Context, types: &'a dyn TypeContext) -> Self {
        Builder {
            context,
            types,
            module: Module::default(),
            state: State::Idle,
        }
    }

    /// The module under construction.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The function currently open, if any.
    pub fn current_function(&self) -> Option<Handle<Function>> {
        match self.state {
            State::Open { function, .. } => Some(function),
            State::Idle => None,
        }
    }

    /// The block the cursor is positioned on, if any.
    pub fn insert_point(&self) -> Option<Handle<BasicBlock>> {
        match self.state {
            State::Open { insert_point, .. } => insert_point,
            State::Idle => None,
        }
    }

    /// Record that the module uses `capability`. Idempotent.
    pub fn require_capability(&mut self, capability: spirv::Capability) {
        self.module.capabilities.require(capability);
    }

    /// Allocate a constant node, usable as an operand anywhere in the unit.
    ///
    /// Needs no cursor: constants live outside basic blocks. This simply
    /// forwards to [`Context::constant`] on the borrowed context.
    pub fn get_constant_scalar(
        &mut self,
        ty: TypeRef,
        value: Literal,
        span: Span,
    ) -> Handle<Instruction> {
        self.context.constant(ty, value, span)
    }

    /// Finish construction and hand over the module.
    ///
    /// # Panics
    ///
    /// If a function is still open.
    pub fn finish(self) -> Module {
        assert!(
            matches!(self.state, State::Idle),
            "unterminated function"
        );
        self.module
    }

    fn active_function(&self, what: &str) -> Handle<Function> {
        match self.state {
            State::Open { function, .. } => function,
            State::Idle => panic!("found detached {what}"),
        }
    }

    fn cursor(&self) -> Handle<BasicBlock> {
        match self.state {
            State::Open {
                insert_point: Some(block),
                ..
            } => block,
            _ => panic!("null insert point"),
        }
    }

    /// Allocate an instruction node and append it to the cursor block.
    fn append(
        &mut self,
        ty: Option<TypeRef>,
        span: Span,
        op: Operation,
    ) -> Handle<Instruction> {
        let block = self.cursor();
        let handle = self.context.instructions.append(Instruction {
            ty,
            id: None,
            span,
            name: None,
            op,
        });
        self.context.blocks[block].instructions.push(handle);
        handle
    }

    //
    // Function scope
    //

    /// Open a new function. Legal only when no function is open.
    pub fn begin_function(
        &mut self,
        return_type: TypeRef,
        span: Span,
        name: &str,
    ) -> Handle<Function> {
        assert!(
            matches!(self.state, State::Idle),
            "found nested function"
        );
        log::trace!("begin function {name:?}");
        let function = self.context.functions.append(Function {
            return_type,
            id: None,
            span,
            name: name.to_string(),
            control: spirv::FunctionControl::NONE,
            parameters: Vec::new(),
            variables: Vec::new(),
            blocks: Vec::new(),
        });
        self.state = State::Open {
            function,
            pending_blocks: Vec::new(),
            insert_point: None,
        };
        function
    }

    /// Append a formal parameter to the open function.
    pub fn add_fn_param(&mut self, ty: TypeRef, span: Span, name: &str) -> Handle<Instruction> {
        let function = self.active_function("parameter");
        let param = self.context.instructions.append(Instruction {
            ty: Some(ty),
            id: None,
            span,
            name: Some(name.to_string()),
            op: Operation::FunctionParameter,
        });
        self.context.functions[function].parameters.push(param);
        param
    }

    /// Append a function-scope variable to the open function.
    pub fn add_fn_var(
        &mut self,
        ty: TypeRef,
        span: Span,
        name: &str,
        init: Option<Handle<Instruction>>,
    ) -> Handle<Instruction> {
        let function = self.active_function("local variable");
        let var = self.context.instructions.append(Instruction {
            ty: Some(ty),
            id: None,
            span,
            name: Some(name.to_string()),
            op: Operation::Variable {
                storage_class: spirv::StorageClass::Function,
                init,
            },
        });
        self.context.functions[function].variables.push(var);
        var
    }

    /// Create a detached basic block for the open function.
    ///
    /// The block is recorded but not yet attached; position the cursor on it
    /// with [`set_insert_point`](Self::set_insert_point) to emit into it.
    pub fn create_basic_block(&mut self, name: &str) -> Handle<BasicBlock> {
        match self.state {
            State::Open {
                ref mut pending_blocks,
                ..
            } => {
                let block = self.context.blocks.append(BasicBlock::new(name.to_string()));
                pending_blocks.push(block);
                block
            }
            State::Idle => panic!("found detached basic block"),
        }
    }

    /// Position the insertion cursor on `block`.
    ///
    /// The front end decides which block to resume emitting into; the
    /// builder only records the choice. `block` must belong to the open
    /// function.
    pub fn set_insert_point(&mut self, block: Handle<BasicBlock>) {
        match self.state {
            State::Open {
                ref pending_blocks,
                ref mut insert_point,
                ..
            } => {
                assert!(
                    pending_blocks.contains(&block),
                    "insert point outside the active function"
                );
                *insert_point = Some(block);
            }
            State::Idle => panic!("no active function"),
        }
    }

    /// Close the open function: attach its blocks in creation order, attach
    /// it to the module, and clear the cursor.
    ///
    /// Block order is not adjusted to satisfy module-level ordering rules;
    /// that is left to later passes.
    pub fn end_function(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Idle);
        let State::Open {
            function,
            pending_blocks,
            ..
        } = state
        else {
            panic!("no active function");
        };
        log::trace!(
            "end function {:?} with {} blocks",
            self.context.functions[function].name,
            pending_blocks.len()
        );
        self.context.functions[function].blocks = pending_blocks;
        self.module.functions.push(function);
    }

    //
    // Direct block mutators
    //

    /// Record a control-flow successor on the cursor block.
    pub fn add_successor(&mut self, successor: Handle<BasicBlock>) {
        let block = self.cursor();
        self.context.blocks[block].successors.push(successor);
    }

    /// Record the merge target on the cursor block.
    pub fn set_merge_target(&mut self, merge: Handle<BasicBlock>) {
        let block = self.cursor();
        self.context.blocks[block].merge_target = Some(merge);
    }

    /// Record the continue target on the cursor block.
    pub fn set_continue_target(&mut self, continuing: Handle<BasicBlock>) {
        let block = self.cursor();
        self.context.blocks[block].continue_target = Some(continuing);
    }

    //
    // Memory and composites
    //

    pub fn create_load(
        &mut self,
        ty: TypeRef,
        pointer: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(Some(ty), span, Operation::Load { pointer })
    }

    pub fn create_store(
        &mut self,
        pointer: Handle<Instruction>,
        value: Handle<Instruction>,
        span: Span,
    ) {
        self.append(None, span, Operation::Store { pointer, value });
    }

    pub fn create_composite_construct(
        &mut self,
        ty: TypeRef,
        constituents: &[Handle<Instruction>],
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::CompositeConstruct {
                constituents: constituents.to_vec(),
            },
        )
    }

    pub fn create_composite_extract(
        &mut self,
        ty: TypeRef,
        composite: Handle<Instruction>,
        indices: &[u32],
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::CompositeExtract {
                composite,
                indices: indices.to_vec(),
            },
        )
    }

    pub fn create_composite_insert(
        &mut self,
        ty: TypeRef,
        composite: Handle<Instruction>,
        object: Handle<Instruction>,
        indices: &[u32],
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::CompositeInsert {
                composite,
                object,
                indices: indices.to_vec(),
            },
        )
    }

    pub fn create_vector_shuffle(
        &mut self,
        ty: TypeRef,
        vector1: Handle<Instruction>,
        vector2: Handle<Instruction>,
        selectors: &[u32],
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::VectorShuffle {
                vector1,
                vector2,
                selectors: selectors.to_vec(),
            },
        )
    }

    pub fn create_access_chain(
        &mut self,
        ty: TypeRef,
        base: Handle<Instruction>,
        indices: &[Handle<Instruction>],
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::AccessChain {
                base,
                indices: indices.to_vec(),
            },
        )
    }

    pub fn create_function_call(
        &mut self,
        ty: TypeRef,
        function: Handle<Function>,
        arguments: &[Handle<Instruction>],
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::FunctionCall {
                function,
                arguments: arguments.to_vec(),
            },
        )
    }

    //
    // Arithmetic, conversions, selection
    //

    pub fn create_unary_op(
        &mut self,
        op: spirv::Op,
        ty: TypeRef,
        operand: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        let handle = self.append(Some(ty), span, Operation::Unary { op, operand });
        // Image queries are the only unary opcodes carrying a capability.
        match op {
            spirv::Op::ImageQuerySize
            | spirv::Op::ImageQueryLevels
            | spirv::Op::ImageQuerySamples => {
                self.require_capability(spirv::Capability::ImageQuery);
            }
            _ => {}
        }
        handle
    }

    pub fn create_binary_op(
        &mut self,
        op: spirv::Op,
        ty: TypeRef,
        left: Handle<Instruction>,
        right: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        let handle = self.append(Some(ty), span, Operation::Binary { op, left, right });
        // Likewise for the two-operand image queries.
        match op {
            spirv::Op::ImageQueryLod | spirv::Op::ImageQuerySizeLod => {
                self.require_capability(spirv::Capability::ImageQuery);
            }
            _ => {}
        }
        handle
    }

    pub fn create_spec_constant_binary_op(
        &mut self,
        op: spirv::Op,
        ty: TypeRef,
        left: Handle<Instruction>,
        right: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::SpecConstantBinary { op, left, right },
        )
    }

    pub fn create_select(
        &mut self,
        ty: TypeRef,
        condition: Handle<Instruction>,
        accept: Handle<Instruction>,
        reject: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::Select {
                condition,
                accept,
                reject,
            },
        )
    }

    //
    // Group operations
    //

    pub fn create_group_non_uniform_elect(
        &mut self,
        ty: TypeRef,
        exec_scope: spirv::Scope,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(Some(ty), span, Operation::GroupNonUniformElect { exec_scope })
    }

    pub fn create_group_non_uniform_unary_op(
        &mut self,
        op: spirv::Op,
        ty: TypeRef,
        exec_scope: spirv::Scope,
        group_op: Option<spirv::GroupOperation>,
        operand: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::GroupNonUniformUnary {
                op,
                exec_scope,
                group_op,
                operand,
            },
        )
    }

    pub fn create_group_non_uniform_binary_op(
        &mut self,
        op: spirv::Op,
        ty: TypeRef,
        exec_scope: spirv::Scope,
        left: Handle<Instruction>,
        right: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::GroupNonUniformBinary {
                op,
                exec_scope,
                left,
                right,
            },
        )
    }

    //
    // Atomics
    //

    /// A generic atomic read-modify-write.
    pub fn create_atomic_op(
        &mut self,
        op: spirv::Op,
        ty: TypeRef,
        pointer: Handle<Instruction>,
        scope: spirv::Scope,
        semantics: spirv::MemorySemantics,
        value: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::Atomic {
                op,
                pointer,
                scope,
                semantics,
                unequal_semantics: None,
                value,
                comparator: None,
            },
        )
    }

    /// An atomic compare-exchange: the same node shape as
    /// [`create_atomic_op`](Self::create_atomic_op), with separate memory
    /// semantics for the equal and unequal outcomes and a comparator value.
    pub fn create_atomic_compare_exchange(
        &mut self,
        ty: TypeRef,
        pointer: Handle<Instruction>,
        scope: spirv::Scope,
        equal_semantics: spirv::MemorySemantics,
        unequal_semantics: spirv::MemorySemantics,
        value: Handle<Instruction>,
        comparator: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::Atomic {
                op: spirv::Op::AtomicCompareExchange,
                pointer,
                scope,
                semantics: equal_semantics,
                unequal_semantics: Some(unequal_semantics),
                value,
                comparator: Some(comparator),
            },
        )
    }

    /// A pointer to a single texel of an image, for atomic access.
    pub fn create_image_texel_pointer(
        &mut self,
        ty: TypeRef,
        image: Handle<Instruction>,
        coordinate: Handle<Instruction>,
        sample: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::ImageTexelPointer {
                image,
                coordinate,
                sample,
            },
        )
    }

    //
    // Structured control flow
    //

    /// An unconditional branch.
    ///
    /// If both `merge_block` and `continue_block` are supplied the branch
    /// closes a loop header, so a loop-merge marker declaring the pair is
    /// emitted immediately before it.
    pub fn create_branch(
        &mut self,
        target: Handle<BasicBlock>,
        merge_block: Option<Handle<BasicBlock>>,
        continue_block: Option<Handle<BasicBlock>>,
        loop_control: spirv::LoopControl,
        span: Span,
    ) {
        if let (Some(merge), Some(continuing)) = (merge_block, continue_block) {
            self.append(
                None,
                span,
                Operation::LoopMerge {
                    merge,
                    continuing,
                    control: loop_control,
                },
            );
        }
        self.append(None, span, Operation::Branch { target });
    }

    /// A two-way conditional branch.
    ///
    /// With `merge_block` supplied, exactly one merge marker precedes the
    /// branch: a loop merge if `continue_block` is also supplied, a
    /// selection merge otherwise. The two marker kinds are mutually
    /// exclusive per call.
    #[allow(clippy::too_many_arguments)]
    pub fn create_conditional_branch(
        &mut self,
        condition: Handle<Instruction>,
        accept: Handle<BasicBlock>,
        reject: Handle<BasicBlock>,
        merge_block: Option<Handle<BasicBlock>>,
        continue_block: Option<Handle<BasicBlock>>,
        selection_control: spirv::SelectionControl,
        loop_control: spirv::LoopControl,
        span: Span,
    ) {
        if let Some(merge) = merge_block {
            match continue_block {
                Some(continuing) => {
                    self.append(
                        None,
                        span,
                        Operation::LoopMerge {
                            merge,
                            continuing,
                            control: loop_control,
                        },
                    );
                }
                None => {
                    self.append(
                        None,
                        span,
                        Operation::SelectionMerge {
                            merge,
                            control: selection_control,
                        },
                    );
                }
            }
        }
        self.append(
            None,
            span,
            Operation::BranchConditional {
                condition,
                accept,
                reject,
            },
        );
    }

    /// A multi-way switch, always preceded by its selection-merge marker.
    /// No fall-through is modeled; each case names its target block.
    pub fn create_switch(
        &mut self,
        merge_block: Handle<BasicBlock>,
        selector: Handle<Instruction>,
        default: Handle<BasicBlock>,
        cases: &[SwitchCase],
        span: Span,
    ) {
        self.append(
            None,
            span,
            Operation::SelectionMerge {
                merge: merge_block,
                control: spirv::SelectionControl::NONE,
            },
        );
        self.append(
            None,
            span,
            Operation::Switch {
                selector,
                default,
                cases: cases.to_vec(),
            },
        );
    }

    pub fn create_kill(&mut self, span: Span) {
        self.append(None, span, Operation::Kill);
    }

    pub fn create_return(&mut self, span: Span) {
        self.append(None, span, Operation::Return { value: None });
    }

    pub fn create_return_value(&mut self, value: Handle<Instruction>, span: Span) {
        self.append(None, span, Operation::Return { value: Some(value) });
    }

    //
    // Extended instructions, barriers, bitfields
    //

    /// A call into the `GLSL.std.450` extended instruction set.
    pub fn create_ext_inst(
        &mut self,
        ty: TypeRef,
        inst: spirv::GLOp,
        arguments: &[Handle<Instruction>],
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::ExtInst {
                inst,
                arguments: arguments.to_vec(),
            },
        )
    }

    /// A memory barrier, or a control barrier when `exec_scope` is supplied.
    pub fn create_barrier(
        &mut self,
        memory_scope: spirv::Scope,
        semantics: spirv::MemorySemantics,
        exec_scope: Option<spirv::Scope>,
        span: Span,
    ) {
        self.append(
            None,
            span,
            Operation::Barrier {
                memory_scope,
                semantics,
                exec_scope,
            },
        );
    }

    pub fn create_bit_field_insert(
        &mut self,
        ty: TypeRef,
        base: Handle<Instruction>,
        insert: Handle<Instruction>,
        offset: Handle<Instruction>,
        count: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::BitFieldInsert {
                base,
                insert,
                offset,
                count,
            },
        )
    }

    pub fn create_bit_field_extract(
        &mut self,
        ty: TypeRef,
        base: Handle<Instruction>,
        offset: Handle<Instruction>,
        count: Handle<Instruction>,
        signed: bool,
        span: Span,
    ) -> Handle<Instruction> {
        self.append(
            Some(ty),
            span,
            Operation::BitFieldExtract {
                base,
                offset,
                count,
                signed,
            },
        )
    }

    //
    // Geometry stream output
    //

    pub fn create_emit_vertex(&mut self, span: Span) {
        let _ = self.cursor();
        self.require_capability(spirv::Capability::Geometry);
        self.append(None, span, Operation::EmitVertex);
    }

    pub fn create_end_primitive(&mut self, span: Span) {
        let _ = self.cursor();
        self.require_capability(spirv::Capability::Geometry);
        self.append(None, span, Operation::EndPrimitive);
    }
}
