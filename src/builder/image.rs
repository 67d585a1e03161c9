/*!
Construction of image instructions.

This is the densest instruction-selection logic in the builder: the sample,
fetch/read, and gather constructors each pick among several opcode variants
depending on which optional operands are present, compose the image-operand
mask in the bit order the binary form requires, and accumulate the
capabilities those operands imply. Sparse-residency variants additionally
split their `(status, texel)` result into the two values the caller needs.
*/

use super::Builder;
use crate::arena::Handle;
use crate::{CapabilitySet, ImageAccess, ImageOperands, Instruction, Operation, Span, TypeRef};

impl ImageOperands {
    /// Compose the binary operand mask for this set of operands, recording
    /// the capabilities their presence requires.
    ///
    /// The bit order is fixed by the instruction encoding: Bias, Lod, Grad,
    /// ConstOffset, Offset, ConstOffsets, Sample, MinLod. A variable offset
    /// or a const-offsets list requires `ImageGatherExtended`; a minimum
    /// level of detail requires `MinLod`. The same operands always produce
    /// the same mask and the same capability additions.
    pub fn compose_mask(&self, capabilities: &mut CapabilitySet) -> spirv::ImageOperands {
        let mut mask = spirv::ImageOperands::empty();
        mask.set(spirv::ImageOperands::BIAS, self.bias.is_some());
        mask.set(spirv::ImageOperands::LOD, self.lod.is_some());
        mask.set(spirv::ImageOperands::GRAD, self.grad.is_some());
        mask.set(spirv::ImageOperands::CONST_OFFSET, self.const_offset.is_some());
        if self.offset.is_some() {
            mask |= spirv::ImageOperands::OFFSET;
            capabilities.require(spirv::Capability::ImageGatherExtended);
        }
        if self.const_offsets.is_some() {
            mask |= spirv::ImageOperands::CONST_OFFSETS;
            capabilities.require(spirv::Capability::ImageGatherExtended);
        }
        mask.set(spirv::ImageOperands::SAMPLE, self.sample.is_some());
        if self.min_lod.is_some() {
            capabilities.require(spirv::Capability::MinLod);
            mask |= spirv::ImageOperands::MIN_LOD;
        }
        mask
    }
}

impl<'a> Builder<'a> {
    /// Split a sparse access result into its parts: store the residency
    /// status (field 0) through `residency_out`, and return the texel value
    /// (field 1).
    fn unwrap_sparse_result(
        &mut self,
        texel_type: TypeRef,
        access: Handle<Instruction>,
        residency_out: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        let uint = self.types.uint_type();
        let status = self.create_composite_extract(uint, access, &[0], span);
        self.create_store(residency_out, status, span);
        self.create_composite_extract(texel_type, access, &[1], span)
    }

    /// Sample a texture through a sampler.
    ///
    /// The opcode is chosen along three independent axes: depth comparison
    /// (`dref` present), explicit level of detail (a Lod operand or a
    /// complete gradient pair), and sparse residency (`residency` present).
    /// An `OpSampledImage` combinator joining `image` and `sampler` is
    /// emitted first; `image_type` is its result type.
    ///
    /// When `residency` is supplied, the instruction's real result is a
    /// `(status, texel)` pair — the struct type itself is materialized by
    /// the downstream type lowering — and the two fields are split apart:
    /// the status is stored through `residency`, and the returned handle is
    /// the extracted texel value.
    ///
    /// # Panics
    ///
    /// If both Lod and MinLod are supplied: MinLod is only valid with the
    /// implicit-Lod and gradient variants.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image_sample(
        &mut self,
        texel_type: TypeRef,
        image_type: TypeRef,
        image: Handle<Instruction>,
        sampler: Handle<Instruction>,
        coordinate: Handle<Instruction>,
        dref: Option<Handle<Instruction>>,
        operands: ImageOperands,
        residency: Option<Handle<Instruction>>,
        span: Span,
    ) -> Handle<Instruction> {
        let _ = self.cursor();

        // Lod and Grad operands demand the explicit-lod instructions;
        // everything else samples with an implicit level of detail.
        let explicit_lod = operands.lod.is_some() || operands.grad.is_some();
        let sparse = residency.is_some();

        let op = match (dref.is_some(), explicit_lod, sparse) {
            (false, false, false) => spirv::Op::ImageSampleImplicitLod,
            (false, false, true) => spirv::Op::ImageSparseSampleImplicitLod,
            (false, true, false) => spirv::Op::ImageSampleExplicitLod,
            (false, true, true) => spirv::Op::ImageSparseSampleExplicitLod,
            (true, false, false) => spirv::Op::ImageSampleDrefImplicitLod,
            (true, false, true) => spirv::Op::ImageSparseSampleDrefImplicitLod,
            (true, true, false) => spirv::Op::ImageSampleDrefExplicitLod,
            (true, true, true) => spirv::Op::ImageSparseSampleDrefExplicitLod,
        };

        // MinLod pairs only with implicit-lod or gradient sampling.
        assert!(
            operands.lod.is_none() || operands.min_lod.is_none(),
            "Lod and MinLod are mutually exclusive"
        );

        if sparse {
            self.require_capability(spirv::Capability::SparseResidency);
        }

        let sampled_image = self.append(
            Some(image_type),
            span,
            Operation::SampledImage { image, sampler },
        );

        let mask = operands.compose_mask(&mut self.module.capabilities);
        let access = self.append(
            Some(texel_type),
            span,
            Operation::Image(ImageAccess {
                op,
                image: sampled_image,
                coordinate,
                mask,
                dref,
                operands,
                component: None,
                texel: None,
            }),
        );

        match residency {
            Some(target) => self.unwrap_sparse_result(texel_type, access, target, span),
            None => access,
        }
    }

    /// Access a texel by integer coordinate: a fetch when `fetch` is true
    /// (sampler-less access to a sampled or multisampled image), a read of a
    /// storable image otherwise.
    ///
    /// Reads require whatever capability the type subsystem resolves for the
    /// image's element access mode. Sparse variants unwrap their result the
    /// same way sampling does.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image_fetch_or_read(
        &mut self,
        fetch: bool,
        texel_type: TypeRef,
        image_type: TypeRef,
        image: Handle<Instruction>,
        coordinate: Handle<Instruction>,
        lod: Option<Handle<Instruction>>,
        const_offset: Option<Handle<Instruction>>,
        offset: Option<Handle<Instruction>>,
        const_offsets: Option<Handle<Instruction>>,
        sample: Option<Handle<Instruction>>,
        residency: Option<Handle<Instruction>>,
        span: Span,
    ) -> Handle<Instruction> {
        let _ = self.cursor();

        let operands = ImageOperands {
            lod,
            const_offset,
            offset,
            const_offsets,
            sample,
            ..Default::default()
        };
        let mask = operands.compose_mask(&mut self.module.capabilities);

        let sparse = residency.is_some();
        if sparse {
            self.require_capability(spirv::Capability::SparseResidency);
        }

        let op = match (fetch, sparse) {
            (true, false) => spirv::Op::ImageFetch,
            (true, true) => spirv::Op::ImageSparseFetch,
            (false, false) => spirv::Op::ImageRead,
            (false, true) => spirv::Op::ImageSparseRead,
        };

        if !fetch {
            let capability = self.types.storage_image_capability(image_type);
            self.require_capability(capability);
        }

        let access = self.append(
            Some(texel_type),
            span,
            Operation::Image(ImageAccess {
                op,
                image,
                coordinate,
                mask,
                dref: None,
                operands,
                component: None,
                texel: None,
            }),
        );

        match residency {
            Some(target) => self.unwrap_sparse_result(texel_type, access, target, span),
            None => access,
        }
    }

    /// Write a texel to a storable image. No result, no sparse variant.
    pub fn create_image_write(
        &mut self,
        image_type: TypeRef,
        image: Handle<Instruction>,
        coordinate: Handle<Instruction>,
        texel: Handle<Instruction>,
        span: Span,
    ) {
        let _ = self.cursor();
        let capability = self.types.storage_image_capability(image_type);
        self.require_capability(capability);
        self.append(
            None,
            span,
            Operation::Image(ImageAccess {
                op: spirv::Op::ImageWrite,
                image,
                coordinate,
                mask: spirv::ImageOperands::empty(),
                dref: None,
                operands: ImageOperands::default(),
                component: None,
                texel: Some(texel),
            }),
        );
    }

    /// Gather one component from the four sampled texels.
    ///
    /// Gathering never takes a per-texel level of detail, so the mask is
    /// composed without Bias, Lod, or Grad. The opcode is chosen by depth
    /// comparison and sparse residency, and sparse results unwrap the same
    /// way sampling does.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image_gather(
        &mut self,
        texel_type: TypeRef,
        image_type: TypeRef,
        image: Handle<Instruction>,
        sampler: Handle<Instruction>,
        coordinate: Handle<Instruction>,
        component: Handle<Instruction>,
        dref: Option<Handle<Instruction>>,
        const_offset: Option<Handle<Instruction>>,
        offset: Option<Handle<Instruction>>,
        const_offsets: Option<Handle<Instruction>>,
        sample: Option<Handle<Instruction>>,
        residency: Option<Handle<Instruction>>,
        span: Span,
    ) -> Handle<Instruction> {
        let _ = self.cursor();

        let sparse = residency.is_some();
        if sparse {
            self.require_capability(spirv::Capability::SparseResidency);
        }

        let sampled_image = self.append(
            Some(image_type),
            span,
            Operation::SampledImage { image, sampler },
        );

        let operands = ImageOperands {
            const_offset,
            offset,
            const_offsets,
            sample,
            ..Default::default()
        };
        let mask = operands.compose_mask(&mut self.module.capabilities);

        let op = match (dref.is_some(), sparse) {
            (false, false) => spirv::Op::ImageGather,
            (false, true) => spirv::Op::ImageSparseGather,
            (true, false) => spirv::Op::ImageDrefGather,
            (true, true) => spirv::Op::ImageSparseDrefGather,
        };

        let access = self.append(
            Some(texel_type),
            span,
            Operation::Image(ImageAccess {
                op,
                image: sampled_image,
                coordinate,
                mask,
                dref,
                operands,
                component: Some(component),
                texel: None,
            }),
        );

        match residency {
            Some(target) => self.unwrap_sparse_result(texel_type, access, target, span),
            None => access,
        }
    }

    /// Test a residency status code produced by a sparse access, yielding a
    /// boolean.
    pub fn create_image_sparse_texels_resident(
        &mut self,
        resident_code: Handle<Instruction>,
        span: Span,
    ) -> Handle<Instruction> {
        let bool_type = self.types.bool_type();
        self.append(
            Some(bool_type),
            span,
            Operation::ImageSparseTexelsResident { resident_code },
        )
    }
}
