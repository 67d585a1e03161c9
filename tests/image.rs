use spv_ir::{
    BasicBlock, Builder, CapabilitySet, Context, Handle, ImageOperands, Instruction, Literal,
    Module, Operation, Span, TypeContext, TypeRef,
};

/// Stand-in for the type subsystem: hands out fixed opaque tokens.
struct Types;

const UINT: TypeRef = TypeRef::from_raw(1);
const BOOL: TypeRef = TypeRef::from_raw(2);
const F32: TypeRef = TypeRef::from_raw(3);
const F32X2: TypeRef = TypeRef::from_raw(4);
const F32X4: TypeRef = TypeRef::from_raw(5);
const IMAGE: TypeRef = TypeRef::from_raw(6);
const SAMPLER: TypeRef = TypeRef::from_raw(7);
const SAMPLED_IMAGE: TypeRef = TypeRef::from_raw(8);
const UINT_PTR: TypeRef = TypeRef::from_raw(9);
const STORAGE_IMAGE: TypeRef = TypeRef::from_raw(10);
const INT: TypeRef = TypeRef::from_raw(11);

impl TypeContext for Types {
    fn storage_image_capability(&self, _image: TypeRef) -> spirv::Capability {
        spirv::Capability::StorageImageReadWithoutFormat
    }

    fn uint_type(&self) -> TypeRef {
        UINT
    }

    fn bool_type(&self) -> TypeRef {
        BOOL
    }
}

//
// Operand mask composition
//

#[test]
fn operand_mask_covers_all_presence_combinations() {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);
    builder.begin_function(F32X4, Span::UNDEFINED, "mask");
    let p: Vec<_> = (0..9)
        .map(|i| builder.add_fn_param(F32, Span::UNDEFINED, &format!("p{i}")))
        .collect();
    builder.end_function();
    builder.finish();

    // Presence bits in the fixed encoding order:
    // Bias, Lod, Grad, ConstOffset, Offset, ConstOffsets, Sample, MinLod.
    for bits in 0..256u32 {
        let present = |bit: u32| bits & (1 << bit) != 0;
        let operands = ImageOperands {
            bias: present(0).then_some(p[0]),
            lod: present(1).then_some(p[1]),
            grad: present(2).then_some((p[2], p[3])),
            const_offset: present(3).then_some(p[4]),
            offset: present(4).then_some(p[5]),
            const_offsets: present(5).then_some(p[6]),
            sample: present(6).then_some(p[7]),
            min_lod: present(7).then_some(p[8]),
        };

        let mut capabilities = CapabilitySet::default();
        let mask = operands.compose_mask(&mut capabilities);
        assert_eq!(mask.bits(), bits, "mask mismatch for presence {bits:#010b}");

        let wants_gather_extended = present(4) || present(5);
        assert_eq!(
            capabilities.contains(spirv::Capability::ImageGatherExtended),
            wants_gather_extended
        );
        assert_eq!(
            capabilities.contains(spirv::Capability::MinLod),
            present(7)
        );
        let expected_len = usize::from(wants_gather_extended) + usize::from(present(7));
        assert_eq!(capabilities.len(), expected_len);
    }
}

#[test]
fn operand_mask_is_deterministic_and_requirements_idempotent() {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);
    builder.begin_function(F32X4, Span::UNDEFINED, "idempotent");
    let offset = builder.add_fn_param(F32, Span::UNDEFINED, "offset");
    builder.end_function();
    builder.finish();

    let operands = ImageOperands {
        offset: Some(offset),
        ..Default::default()
    };

    let mut capabilities = CapabilitySet::default();
    let first = operands.compose_mask(&mut capabilities);
    let second = operands.compose_mask(&mut capabilities);
    assert_eq!(first, second);
    // Two composes still add the one capability exactly once.
    assert_eq!(capabilities.len(), 1);
    assert!(capabilities.contains(spirv::Capability::ImageGatherExtended));
}

//
// Sampling
//

struct BuiltAccess {
    ctx: Context,
    module: Module,
    entry: Handle<BasicBlock>,
    result: Handle<Instruction>,
    residency_var: Handle<Instruction>,
}

impl BuiltAccess {
    fn body(&self) -> &[Handle<Instruction>] {
        &self.ctx.blocks[self.entry].instructions
    }

    fn op(&self, handle: Handle<Instruction>) -> &Operation {
        &self.ctx.instructions[handle].op
    }

    /// Check the two-extract-and-store unwrap that every sparse access
    /// performs, given the index of the access instruction in the block.
    fn assert_sparse_unwrap(&self, access_index: usize, texel_type: TypeRef) {
        let body = self.body();
        let access = body[access_index];

        let status = body[access_index + 1];
        assert_eq!(
            *self.op(status),
            Operation::CompositeExtract {
                composite: access,
                indices: vec![0],
            }
        );
        assert_eq!(self.ctx.instructions[status].ty, Some(UINT));

        assert_eq!(
            *self.op(body[access_index + 2]),
            Operation::Store {
                pointer: self.residency_var,
                value: status,
            }
        );

        let texel = body[access_index + 3];
        assert_eq!(
            *self.op(texel),
            Operation::CompositeExtract {
                composite: access,
                indices: vec![1],
            }
        );
        assert_eq!(self.ctx.instructions[texel].ty, Some(texel_type));
        assert_eq!(self.result, texel);

        // Exactly one store in the whole block.
        let stores = body
            .iter()
            .filter(|&&h| matches!(*self.op(h), Operation::Store { .. }))
            .count();
        assert_eq!(stores, 1);
    }
}

fn build_sample(dref: bool, explicit: bool, sparse: bool) -> BuiltAccess {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);

    builder.begin_function(F32X4, Span::UNDEFINED, "sample");
    let image = builder.add_fn_param(IMAGE, Span::UNDEFINED, "image");
    let sampler = builder.add_fn_param(SAMPLER, Span::UNDEFINED, "sampler");
    let coordinate = builder.add_fn_param(F32X2, Span::UNDEFINED, "uv");
    let lod = builder.add_fn_param(F32, Span::UNDEFINED, "lod");
    let compare = builder.add_fn_param(F32, Span::UNDEFINED, "compare");
    let residency_var = builder.add_fn_var(UINT_PTR, Span::UNDEFINED, "residency", None);
    let entry = builder.create_basic_block("entry");
    builder.set_insert_point(entry);

    let operands = ImageOperands {
        lod: explicit.then_some(lod),
        ..Default::default()
    };
    let result = builder.create_image_sample(
        F32X4,
        SAMPLED_IMAGE,
        image,
        sampler,
        coordinate,
        dref.then_some(compare),
        operands,
        sparse.then_some(residency_var),
        Span::UNDEFINED,
    );
    builder.end_function();
    let module = builder.finish();

    BuiltAccess {
        ctx,
        module,
        entry,
        result,
        residency_var,
    }
}

#[test]
fn image_sample_selects_among_eight_opcodes() {
    let table = [
        (false, false, false, spirv::Op::ImageSampleImplicitLod),
        (false, false, true, spirv::Op::ImageSparseSampleImplicitLod),
        (false, true, false, spirv::Op::ImageSampleExplicitLod),
        (false, true, true, spirv::Op::ImageSparseSampleExplicitLod),
        (true, false, false, spirv::Op::ImageSampleDrefImplicitLod),
        (true, false, true, spirv::Op::ImageSparseSampleDrefImplicitLod),
        (true, true, false, spirv::Op::ImageSampleDrefExplicitLod),
        (true, true, true, spirv::Op::ImageSparseSampleDrefExplicitLod),
    ];

    for (dref, explicit, sparse, expected) in table {
        let built = build_sample(dref, explicit, sparse);
        let body = built.body();

        // The combinator always comes first, then the sample itself.
        assert!(matches!(
            *built.op(body[0]),
            Operation::SampledImage { .. }
        ));
        match *built.op(body[1]) {
            Operation::Image(ref access) => {
                assert_eq!(access.op, expected, "for ({dref}, {explicit}, {sparse})");
                assert_eq!(access.image, body[0]);
                assert_eq!(access.dref.is_some(), dref);
                assert_eq!(
                    access.mask.contains(spirv::ImageOperands::LOD),
                    explicit
                );
            }
            ref other => panic!("expected an image access, found {other:?}"),
        }

        assert_eq!(
            built.module.capabilities.contains(spirv::Capability::SparseResidency),
            sparse
        );
        if sparse {
            assert_eq!(body.len(), 5);
            built.assert_sparse_unwrap(1, F32X4);
        } else {
            assert_eq!(body.len(), 2);
            assert_eq!(built.result, body[1]);
            assert!(built.module.capabilities.is_empty());
        }
    }
}

#[test]
fn complete_gradient_pair_forces_explicit_lod() {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);

    builder.begin_function(F32X4, Span::UNDEFINED, "gradient");
    let image = builder.add_fn_param(IMAGE, Span::UNDEFINED, "image");
    let sampler = builder.add_fn_param(SAMPLER, Span::UNDEFINED, "sampler");
    let coordinate = builder.add_fn_param(F32X2, Span::UNDEFINED, "uv");
    let ddx = builder.add_fn_param(F32X2, Span::UNDEFINED, "ddx");
    let ddy = builder.add_fn_param(F32X2, Span::UNDEFINED, "ddy");
    let entry = builder.create_basic_block("entry");
    builder.set_insert_point(entry);

    let operands = ImageOperands {
        grad: Some((ddx, ddy)),
        ..Default::default()
    };
    let result = builder.create_image_sample(
        F32X4,
        SAMPLED_IMAGE,
        image,
        sampler,
        coordinate,
        None,
        operands,
        None,
        Span::UNDEFINED,
    );
    builder.end_function();
    builder.finish();

    match ctx.instructions[result].op {
        Operation::Image(ref access) => {
            assert_eq!(access.op, spirv::Op::ImageSampleExplicitLod);
            assert!(access.mask.contains(spirv::ImageOperands::GRAD));
            assert!(!access.mask.contains(spirv::ImageOperands::LOD));
        }
        ref other => panic!("expected an image access, found {other:?}"),
    }
}

#[test]
#[should_panic(expected = "Lod and MinLod are mutually exclusive")]
fn lod_with_min_lod_is_fatal() {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);

    builder.begin_function(F32X4, Span::UNDEFINED, "conflicted");
    let image = builder.add_fn_param(IMAGE, Span::UNDEFINED, "image");
    let sampler = builder.add_fn_param(SAMPLER, Span::UNDEFINED, "sampler");
    let coordinate = builder.add_fn_param(F32X2, Span::UNDEFINED, "uv");
    let lod = builder.add_fn_param(F32, Span::UNDEFINED, "lod");
    let min_lod = builder.add_fn_param(F32, Span::UNDEFINED, "min_lod");
    let entry = builder.create_basic_block("entry");
    builder.set_insert_point(entry);

    let operands = ImageOperands {
        lod: Some(lod),
        min_lod: Some(min_lod),
        ..Default::default()
    };
    builder.create_image_sample(
        F32X4,
        SAMPLED_IMAGE,
        image,
        sampler,
        coordinate,
        None,
        operands,
        None,
        Span::UNDEFINED,
    );
}

//
// Fetch and read
//

fn build_fetch_or_read(fetch: bool, sparse: bool) -> BuiltAccess {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);

    builder.begin_function(F32X4, Span::UNDEFINED, "fetch_or_read");
    let image = builder.add_fn_param(STORAGE_IMAGE, Span::UNDEFINED, "image");
    let coordinate = builder.add_fn_param(INT, Span::UNDEFINED, "coord");
    let residency_var = builder.add_fn_var(UINT_PTR, Span::UNDEFINED, "residency", None);
    let entry = builder.create_basic_block("entry");
    builder.set_insert_point(entry);

    let result = builder.create_image_fetch_or_read(
        fetch,
        F32X4,
        STORAGE_IMAGE,
        image,
        coordinate,
        None,
        None,
        None,
        None,
        None,
        sparse.then_some(residency_var),
        Span::UNDEFINED,
    );
    builder.end_function();
    let module = builder.finish();

    BuiltAccess {
        ctx,
        module,
        entry,
        result,
        residency_var,
    }
}

#[test]
fn fetch_and_read_select_among_four_opcodes() {
    let table = [
        (true, false, spirv::Op::ImageFetch),
        (true, true, spirv::Op::ImageSparseFetch),
        (false, false, spirv::Op::ImageRead),
        (false, true, spirv::Op::ImageSparseRead),
    ];

    for (fetch, sparse, expected) in table {
        let built = build_fetch_or_read(fetch, sparse);
        let body = built.body();

        // No combinator here; the access operates on the image directly.
        match *built.op(body[0]) {
            Operation::Image(ref access) => {
                assert_eq!(access.op, expected, "for ({fetch}, {sparse})");
                assert!(access.mask.is_empty());
            }
            ref other => panic!("expected an image access, found {other:?}"),
        }

        // Reads need the capability the type subsystem resolves; fetches
        // touch no storage image.
        assert_eq!(
            built
                .module
                .capabilities
                .contains(spirv::Capability::StorageImageReadWithoutFormat),
            !fetch
        );
        assert_eq!(
            built.module.capabilities.contains(spirv::Capability::SparseResidency),
            sparse
        );
        if sparse {
            assert_eq!(body.len(), 4);
            built.assert_sparse_unwrap(0, F32X4);
        } else {
            assert_eq!(body.len(), 1);
            assert_eq!(built.result, body[0]);
        }
    }
}

//
// Write
//

#[test]
fn image_write_has_no_result_and_requires_the_storage_capability() {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);

    builder.begin_function(F32X4, Span::UNDEFINED, "write");
    let image = builder.add_fn_param(STORAGE_IMAGE, Span::UNDEFINED, "image");
    let coordinate = builder.add_fn_param(INT, Span::UNDEFINED, "coord");
    let texel = builder.add_fn_param(F32X4, Span::UNDEFINED, "texel");
    let entry = builder.create_basic_block("entry");
    builder.set_insert_point(entry);

    builder.create_image_write(STORAGE_IMAGE, image, coordinate, texel, Span::UNDEFINED);
    builder.end_function();
    let module = builder.finish();

    let body = &ctx.blocks[entry].instructions;
    assert_eq!(body.len(), 1);
    let inst = &ctx.instructions[body[0]];
    assert_eq!(inst.ty, None);
    match inst.op {
        Operation::Image(ref access) => {
            assert_eq!(access.op, spirv::Op::ImageWrite);
            assert!(access.mask.is_empty());
            assert_eq!(access.texel, Some(texel));
        }
        ref other => panic!("expected an image access, found {other:?}"),
    }
    assert!(module
        .capabilities
        .contains(spirv::Capability::StorageImageReadWithoutFormat));
}

//
// Gather
//

fn build_gather(dref: bool, sparse: bool) -> BuiltAccess {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);

    builder.begin_function(F32X4, Span::UNDEFINED, "gather");
    let image = builder.add_fn_param(IMAGE, Span::UNDEFINED, "image");
    let sampler = builder.add_fn_param(SAMPLER, Span::UNDEFINED, "sampler");
    let coordinate = builder.add_fn_param(F32X2, Span::UNDEFINED, "uv");
    let compare = builder.add_fn_param(F32, Span::UNDEFINED, "compare");
    let offset = builder.add_fn_param(INT, Span::UNDEFINED, "offset");
    let residency_var = builder.add_fn_var(UINT_PTR, Span::UNDEFINED, "residency", None);
    let entry = builder.create_basic_block("entry");
    builder.set_insert_point(entry);

    let component = builder.get_constant_scalar(UINT, Literal::U32(1), Span::UNDEFINED);
    let result = builder.create_image_gather(
        F32X4,
        SAMPLED_IMAGE,
        image,
        sampler,
        coordinate,
        component,
        dref.then_some(compare),
        None,
        Some(offset),
        None,
        None,
        sparse.then_some(residency_var),
        Span::UNDEFINED,
    );
    builder.end_function();
    let module = builder.finish();

    BuiltAccess {
        ctx,
        module,
        entry,
        result,
        residency_var,
    }
}

#[test]
fn gather_selects_among_four_opcodes() {
    let table = [
        (false, false, spirv::Op::ImageGather),
        (false, true, spirv::Op::ImageSparseGather),
        (true, false, spirv::Op::ImageDrefGather),
        (true, true, spirv::Op::ImageSparseDrefGather),
    ];

    for (dref, sparse, expected) in table {
        let built = build_gather(dref, sparse);
        let body = built.body();

        assert!(matches!(
            *built.op(body[0]),
            Operation::SampledImage { .. }
        ));
        match *built.op(body[1]) {
            Operation::Image(ref access) => {
                assert_eq!(access.op, expected, "for ({dref}, {sparse})");
                assert!(access.component.is_some());
                assert_eq!(access.dref.is_some(), dref);
                // Gathers never take a per-texel level of detail.
                assert!(!access.mask.intersects(
                    spirv::ImageOperands::BIAS
                        | spirv::ImageOperands::LOD
                        | spirv::ImageOperands::GRAD
                ));
                assert!(access.mask.contains(spirv::ImageOperands::OFFSET));
            }
            ref other => panic!("expected an image access, found {other:?}"),
        }

        // The variable offset pulls in extended gather support.
        assert!(built
            .module
            .capabilities
            .contains(spirv::Capability::ImageGatherExtended));
        if sparse {
            assert_eq!(body.len(), 5);
            built.assert_sparse_unwrap(1, F32X4);
        } else {
            assert_eq!(body.len(), 2);
            assert_eq!(built.result, body[1]);
        }
    }
}

//
// Residency tests and query capabilities
//

#[test]
fn sparse_texels_resident_yields_a_boolean() {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);

    builder.begin_function(BOOL, Span::UNDEFINED, "resident");
    let code = builder.add_fn_param(UINT, Span::UNDEFINED, "code");
    let entry = builder.create_basic_block("entry");
    builder.set_insert_point(entry);

    let resident = builder.create_image_sparse_texels_resident(code, Span::UNDEFINED);
    builder.create_return_value(resident, Span::UNDEFINED);
    builder.end_function();
    builder.finish();

    let inst = &ctx.instructions[resident];
    assert_eq!(inst.ty, Some(BOOL));
    assert_eq!(
        inst.op,
        Operation::ImageSparseTexelsResident {
            resident_code: code
        }
    );
}

#[test]
fn image_queries_require_the_query_capability() {
    let mut ctx = Context::new();
    let types = Types;
    let mut builder = Builder::new(&mut ctx, &types);

    builder.begin_function(INT, Span::UNDEFINED, "queries");
    let image = builder.add_fn_param(IMAGE, Span::UNDEFINED, "image");
    let level = builder.add_fn_param(INT, Span::UNDEFINED, "level");
    let entry = builder.create_basic_block("entry");
    builder.set_insert_point(entry);

    // An unrelated unary op adds nothing.
    let negated = builder.create_unary_op(spirv::Op::SNegate, INT, level, Span::UNDEFINED);
    assert!(builder.module().capabilities.is_empty());

    builder.create_unary_op(spirv::Op::ImageQueryLevels, INT, image, Span::UNDEFINED);
    assert!(builder
        .module()
        .capabilities
        .contains(spirv::Capability::ImageQuery));

    let lod = builder.create_binary_op(
        spirv::Op::ImageQuerySizeLod,
        INT,
        image,
        negated,
        Span::UNDEFINED,
    );
    builder.create_return_value(lod, Span::UNDEFINED);
    builder.end_function();
    let module = builder.finish();

    // Requiring the capability through two query ops still records it once.
    assert_eq!(module.capabilities.len(), 1);
    assert_eq!(
        module.capabilities.iter().collect::<Vec<_>>(),
        vec![spirv::Capability::ImageQuery]
    );
}
