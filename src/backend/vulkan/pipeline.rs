//! Graphics pipeline for UI drawing from precompiled SPIR-V.

use std::mem::offset_of;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use super::VulkanBackend;
use super::conversion::convert_vk_error;
use crate::backend::{
    DescriptorSetLayoutHandle, GpuBackend, PipelineHandle, PipelineLayoutHandle, RenderPassHandle,
};
use crate::draw::DrawVertex;
use crate::error::{GraphicsError, GraphicsResult};
use crate::program::{DrawingProgram, PROJECTION_PUSH_CONSTANT_SIZE};

/// SPIR-V for the UI vertex and fragment stages.
///
/// The vertex stage reads [`DrawVertex`] at locations 0 (position),
/// 1 (uv) and 2 (color) and the projection push constants. The fragment
/// stage samples set 0 binding 0.
#[derive(Debug, Clone, Copy)]
pub struct UiShaders<'a> {
    pub vertex: &'a [u32],
    pub fragment: &'a [u32],
}

impl VulkanBackend {
    /// Build the UI drawing program for `render_pass`.
    ///
    /// Blending assumes premultiplied alpha. Viewport and scissor are dynamic.
    pub fn create_ui_program(
        self: &Arc<Self>,
        render_pass: RenderPassHandle,
        shaders: UiShaders<'_>,
    ) -> GraphicsResult<DrawingProgram> {
        let device = &self.device;

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
        let set_layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
                None,
            )
        }
        .map_err(|e| convert_vk_error("Failed to create descriptor set layout", e))?;

        let set_layouts = [set_layout];
        let push_constants = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(PROJECTION_PUSH_CONSTANT_SIZE)];
        let pipeline_layout = match unsafe {
            device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::default()
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(&push_constants),
                None,
            )
        } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(convert_vk_error("Failed to create pipeline layout", e));
            }
        };

        let pipeline = match self.create_ui_pipeline(
            vk::RenderPass::from_raw(render_pass.raw()),
            pipeline_layout,
            shaders,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(e);
            }
        };

        log::debug!("Created UI pipeline {:?}", pipeline);

        let program = DrawingProgram::new(
            PipelineHandle::from_raw(pipeline.as_raw()),
            PipelineLayoutHandle::from_raw(pipeline_layout.as_raw()),
            DescriptorSetLayoutHandle::from_raw(set_layout.as_raw()),
        );
        let backend: Arc<dyn GpuBackend> = self.clone();
        let device = self.device.clone();
        Ok(program.with_destructor(
            backend,
            Box::new(move |_| unsafe {
                device.destroy_pipeline(pipeline, None);
                device.destroy_pipeline_layout(pipeline_layout, None);
                device.destroy_descriptor_set_layout(set_layout, None);
            }),
        ))
    }

    fn create_shader_module(&self, code: &[u32]) -> GraphicsResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "shader code is empty".to_string(),
            ));
        }
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(|e| convert_vk_error("Failed to create shader module", e))
    }

    fn create_ui_pipeline(
        &self,
        render_pass: vk::RenderPass,
        pipeline_layout: vk::PipelineLayout,
        shaders: UiShaders<'_>,
    ) -> GraphicsResult<vk::Pipeline> {
        let vertex_module = self.create_shader_module(shaders.vertex)?;
        let fragment_module = match self.create_shader_module(shaders.fragment) {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.destroy_shader_module(vertex_module, None) };
                return Err(e);
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(c"main"),
        ];

        let binding_descriptions = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(size_of::<DrawVertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let attribute_descriptions = [
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(DrawVertex, pos) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(DrawVertex, uv) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(2)
                .binding(0)
                .format(vk::Format::R8G8B8A8_UNORM)
                .offset(offset_of!(DrawVertex, color) as u32),
        ];
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        // UI meshes have no consistent winding.
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_DST_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        let result = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        unsafe {
            self.device.destroy_shader_module(vertex_module, None);
            self.device.destroy_shader_module(fragment_module, None);
        }

        let pipelines =
            result.map_err(|(_, e)| convert_vk_error("Failed to create graphics pipeline", e))?;
        pipelines.into_iter().next().ok_or_else(|| {
            GraphicsError::Internal("pipeline creation returned no pipeline".to_string())
        })
    }
}
