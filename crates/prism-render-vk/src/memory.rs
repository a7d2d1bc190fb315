// SPDX-License-Identifier: CEPL-1.0
//! Buffers and images backed by dedicated allocations.

use ash::vk;
use bytemuck::Pod;
use prism_render::{RenderError, RenderResult};

use crate::context::VkContext;

/// Index of the first memory type allowed by `type_bits` that has every flag in `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

fn allocate(
    ctx: &VkContext,
    req: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
    what: &'static str,
) -> RenderResult<vk::DeviceMemory> {
    let memory_type_index =
        find_memory_type(&ctx.memory_props, req.memory_type_bits, flags).ok_or_else(|| {
            RenderError::config(format!("no memory type with {flags:?} for {what}"))
        })?;
    let info = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    unsafe { ctx.device.allocate_memory(&info, None) }.map_err(|e| RenderError::resource(what, e))
}

/// Host-visible, host-coherent buffer.
pub struct HostBuffer {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl HostBuffer {
    pub fn new(
        ctx: &VkContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        what: &'static str,
    ) -> RenderResult<Self> {
        let d = &ctx.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer =
            unsafe { d.create_buffer(&bci, None) }.map_err(|e| RenderError::resource(what, e))?;
        let req = unsafe { d.get_buffer_memory_requirements(buffer) };
        let flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let memory = match allocate(ctx, req, flags, what) {
            Ok(m) => m,
            Err(e) => {
                unsafe { d.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { d.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                d.destroy_buffer(buffer, None);
                d.free_memory(memory, None);
            }
            return Err(RenderError::resource(what, e));
        }
        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    /// Creates a buffer holding exactly `data`.
    pub fn with_data<T: Pod>(
        ctx: &VkContext,
        usage: vk::BufferUsageFlags,
        data: &[T],
        what: &'static str,
    ) -> RenderResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buf = Self::new(ctx, bytes.len() as vk::DeviceSize, usage, what)?;
        if let Err(e) = buf.write(&ctx.device, data) {
            buf.destroy(&ctx.device);
            return Err(e);
        }
        Ok(buf)
    }

    /// Copies `data` to the start of the buffer. Whatever last read it must have completed.
    pub fn write<T: Pod>(&self, device: &ash::Device, data: &[T]) -> RenderResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(RenderError::Protocol("buffer write larger than the buffer"));
        }
        unsafe {
            let ptr = device
                .map_memory(
                    self.memory,
                    0,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(|e| RenderError::device("buffer map", e))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Device-local depth attachment.
pub struct DepthImage {
    pub image: vk::Image,
    memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl DepthImage {
    pub fn new(ctx: &VkContext, format: vk::Format, extent: vk::Extent2D) -> RenderResult<Self> {
        let d = &ctx.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { d.create_image(&img_ci, None) }
            .map_err(|e| RenderError::resource("depth image", e))?;

        let req = unsafe { d.get_image_memory_requirements(image) };
        let memory = match allocate(ctx, req, vk::MemoryPropertyFlags::DEVICE_LOCAL, "depth memory")
        {
            Ok(m) => m,
            Err(e) => {
                unsafe { d.destroy_image(image, None) };
                return Err(e);
            }
        };
        let bound = unsafe { d.bind_image_memory(image, memory, 0) };

        let view = bound.and_then(|()| {
            let view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::DEPTH,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            unsafe { d.create_image_view(&view_ci, None) }
        });
        match view {
            Ok(view) => Ok(Self {
                image,
                memory,
                view,
            }),
            Err(e) => {
                unsafe {
                    d.destroy_image(image, None);
                    d.free_memory(memory, None);
                }
                Err(RenderError::resource("depth view", e))
            }
        }
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}
