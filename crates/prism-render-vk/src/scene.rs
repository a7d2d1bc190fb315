// SPDX-License-Identifier: CEPL-1.0
//! The playground scene: one vertex-colored cube spinning in front of a fixed camera.

use std::time::Instant;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use prism_math::{spin, Camera};
use prism_render::{FrameContext, FrameRecorder, RenderError, RenderResult, RenderSize};
use tracing::debug;

use crate::backend::VkBackend;
use crate::memory::HostBuffer;
use crate::pipeline::{create_frame_set_layout, ScenePipeline};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

/// Per-slot uniform block, `layout(set = 0, binding = 0)` in the vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
}

impl FrameUniforms {
    pub fn new(camera: &Camera, extent: RenderSize, seconds: f32) -> Self {
        Self {
            view_proj: camera.view_projection(extent.aspect()).to_cols_array_2d(),
            model: spin(seconds, SPIN_RADIANS_PER_SECOND).to_cols_array_2d(),
        }
    }
}

const SPIN_RADIANS_PER_SECOND: f32 = 0.9;

/// Unit cube centered on the origin, one color per corner.
pub fn cube_geometry() -> ([Vertex; 8], [u16; 36]) {
    let mut vertices = [Vertex {
        pos: [0.0; 3],
        color: [0.0; 3],
    }; 8];
    for (i, v) in vertices.iter_mut().enumerate() {
        let bit = |b: usize| ((i >> b) & 1) as f32;
        v.pos = [bit(0) - 0.5, bit(1) - 0.5, bit(2) - 0.5];
        v.color = [0.2 + 0.8 * bit(0), 0.2 + 0.8 * bit(1), 0.2 + 0.8 * bit(2)];
    }
    #[rustfmt::skip]
    let indices = [
        0, 2, 1,  1, 2, 3, // -z
        4, 5, 6,  5, 7, 6, // +z
        0, 1, 4,  1, 5, 4, // -y
        2, 6, 3,  3, 6, 7, // +y
        0, 4, 2,  2, 4, 6, // -x
        1, 3, 5,  3, 7, 5, // +x
    ];
    (vertices, indices)
}

pub fn viewport(extent: RenderSize) -> (vk::Viewport, vk::Rect2D) {
    let vp = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: extent.width,
            height: extent.height,
        },
    };
    (vp, scissor)
}

/// Records the cube into each frame and owns one uniform buffer and descriptor set per slot.
pub struct SceneRecorder {
    pipeline: ScenePipeline,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<HostBuffer>,
    vertices: HostBuffer,
    indices: HostBuffer,
    index_count: u32,
    clear: [f32; 4],
    camera: Camera,
    started: Instant,
}

impl SceneRecorder {
    pub fn new(backend: &VkBackend, frames_in_flight: usize) -> RenderResult<Self> {
        let mut partial = Partial::default();
        Self::build(backend, frames_in_flight, &mut partial).inspect_err(|_| {
            std::mem::take(&mut partial).destroy(backend.device());
        })
    }

    fn build(
        backend: &VkBackend,
        frames_in_flight: usize,
        partial: &mut Partial,
    ) -> RenderResult<Self> {
        let ctx = backend.context();
        let d = backend.device();

        let set_layout = create_frame_set_layout(d)?;
        partial.set_layout = Some(set_layout);
        let pipeline = ScenePipeline::new(d, backend.render_pass(), set_layout)?;
        partial.pipeline = Some((pipeline.layout, pipeline.pipeline));

        let (verts, idx) = cube_geometry();
        let vertices = HostBuffer::with_data(
            ctx,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &verts,
            "vertex buffer",
        )?;
        partial.owned.push(vertices);
        let indices =
            HostBuffer::with_data(ctx, vk::BufferUsageFlags::INDEX_BUFFER, &idx, "index buffer")?;
        partial.owned.push(indices);

        let ubo_size = std::mem::size_of::<FrameUniforms>() as vk::DeviceSize;
        for _ in 0..frames_in_flight {
            let ubo = HostBuffer::new(
                ctx,
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                "uniform buffer",
            )?;
            partial.owned.push(ubo);
        }

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: frames_in_flight as u32,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: frames_in_flight as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let descriptor_pool = unsafe { d.create_descriptor_pool(&pool_ci, None) }
            .map_err(|e| RenderError::resource("descriptor pool", e))?;
        partial.pool = Some(descriptor_pool);

        let layouts = vec![set_layout; frames_in_flight];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe { d.allocate_descriptor_sets(&alloc) }
            .map_err(|e| RenderError::resource("descriptor sets", e))?;

        // everything below is infallible; hand ownership over
        let mut owned = std::mem::take(&mut partial.owned).into_iter();
        let (Some(vertices), Some(indices)) = (owned.next(), owned.next()) else {
            return Err(RenderError::Protocol("scene buffers missing"));
        };
        let uniforms: Vec<HostBuffer> = owned.collect();

        let infos: Vec<vk::DescriptorBufferInfo> = uniforms
            .iter()
            .map(|u| vk::DescriptorBufferInfo {
                buffer: u.buffer,
                offset: 0,
                range: ubo_size,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = sets
            .iter()
            .zip(&infos)
            .map(|(&set, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        unsafe { d.update_descriptor_sets(&writes, &[]) };

        partial.disarm();
        debug!("scene ready: {} uniform slots", uniforms.len());
        Ok(Self {
            pipeline,
            set_layout,
            descriptor_pool,
            sets,
            uniforms,
            vertices,
            indices,
            index_count: idx.len() as u32,
            clear: [0.0, 0.0, 0.0, 1.0],
            camera: Camera::default(),
            started: Instant::now(),
        })
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    /// Device must be idle.
    pub fn destroy(self, device: &ash::Device) {
        self.pipeline.destroy(device);
        unsafe {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
        for u in self.uniforms {
            u.destroy(device);
        }
        self.vertices.destroy(device);
        self.indices.destroy(device);
    }
}

/// Objects created so far by [`SceneRecorder::build`].
#[derive(Default)]
struct Partial {
    set_layout: Option<vk::DescriptorSetLayout>,
    pipeline: Option<(vk::PipelineLayout, vk::Pipeline)>,
    pool: Option<vk::DescriptorPool>,
    owned: Vec<HostBuffer>,
}

impl Partial {
    fn disarm(&mut self) {
        *self = Partial::default();
    }

    fn destroy(self, d: &ash::Device) {
        unsafe {
            if let Some(pool) = self.pool {
                d.destroy_descriptor_pool(pool, None);
            }
            if let Some((layout, pipeline)) = self.pipeline {
                d.destroy_pipeline(pipeline, None);
                d.destroy_pipeline_layout(layout, None);
            }
            if let Some(l) = self.set_layout {
                d.destroy_descriptor_set_layout(l, None);
            }
        }
        for b in self.owned {
            b.destroy(d);
        }
    }
}

impl FrameRecorder<VkBackend> for SceneRecorder {
    fn record(
        &mut self,
        backend: &VkBackend,
        frame: &FrameContext<'_, VkBackend>,
    ) -> RenderResult<()> {
        let d = backend.device();
        let cmd = frame.command_buffer;
        let set = *self
            .sets
            .get(frame.slot)
            .ok_or(RenderError::Protocol("frame slot has no descriptor set"))?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let (vp, scissor) = viewport(frame.extent);
        let begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: backend.render_pass(),
            framebuffer: frame.target.framebuffer,
            render_area: scissor,
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };

        unsafe {
            d.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
            d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                std::slice::from_ref(&set),
                &[],
            );
            d.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&self.vertices.buffer), &[0]);
            d.cmd_bind_index_buffer(cmd, self.indices.buffer, 0, vk::IndexType::UINT16);
            d.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            d.cmd_end_render_pass(cmd);
        }
        Ok(())
    }

    fn update(
        &mut self,
        backend: &VkBackend,
        frame: &FrameContext<'_, VkBackend>,
    ) -> RenderResult<()> {
        let ubo = self
            .uniforms
            .get(frame.slot)
            .ok_or(RenderError::Protocol("frame slot has no uniform buffer"))?;
        let data = FrameUniforms::new(
            &self.camera,
            frame.extent,
            self.started.elapsed().as_secs_f32(),
        );
        ubo.write(backend.device(), std::slice::from_ref(&data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_matches_shader_layout() {
        // two std140 mat4s
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 128);
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
    }

    #[test]
    fn cube_indices_cover_every_corner() {
        let (verts, idx) = cube_geometry();
        assert!(idx.iter().all(|&i| (i as usize) < verts.len()));
        for corner in 0..8u16 {
            // each corner is shared by three faces, at least one triangle per face
            assert!(idx.iter().filter(|&&i| i == corner).count() >= 3);
        }
        for v in &verts {
            assert!(v.pos.iter().all(|c| c.abs() == 0.5));
        }
    }

    #[test]
    fn every_triangle_lies_on_one_face() {
        let (verts, idx) = cube_geometry();
        for tri in idx.chunks(3) {
            let shared_axis = (0..3).any(|axis| {
                let c = verts[tri[0] as usize].pos[axis];
                tri.iter().all(|&i| verts[i as usize].pos[axis] == c)
            });
            assert!(shared_axis, "triangle {tri:?} is not on a cube face");
        }
    }

    #[test]
    fn viewport_spans_extent() {
        let (vp, sc) = viewport(RenderSize {
            width: 1280,
            height: 720,
        });
        assert_eq!((vp.width, vp.height), (1280.0, 720.0));
        assert_eq!(sc.extent.width, 1280);
        assert_eq!(vp.max_depth, 1.0);
    }

    #[test]
    fn uniforms_carry_camera_and_spin() {
        let cam = Camera::default();
        let size = RenderSize {
            width: 800,
            height: 600,
        };
        let u = FrameUniforms::new(&cam, size, 0.0);
        assert_eq!(u.model, prism_math::Mat4::IDENTITY.to_cols_array_2d());
        assert_eq!(u.view_proj, cam.view_projection(800.0 / 600.0).to_cols_array_2d());
    }
}
