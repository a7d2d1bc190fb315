// SPDX-License-Identifier: CEPL-1.0
//! `ash` implementation of the frame-protocol seams.

use std::time::Duration;

use ash::vk;
use prism_render::{
    Acquire, Backend, PresentMode, PresentStatus, Presentation, Queue, RenderError,
    RenderResult, RenderSize, Submission, SurfaceCapabilities, SwapchainRequest,
};
use tracing::{debug, info};

use crate::context::VkContext;
use crate::memory::DepthImage;
use crate::pipeline::{create_render_pass, stage_flags};

/// A surface format is the pixel format plus the color space it is presented in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VkSurfaceFormat {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
}

impl VkSurfaceFormat {
    pub const BGRA8_SRGB: Self = Self {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const RGBA8_SRGB: Self = Self {
        format: vk::Format::R8G8B8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const BGRA8_UNORM: Self = Self {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    /// SDR preference order.
    pub fn preferred() -> Vec<Self> {
        vec![Self::BGRA8_SRGB, Self::RGBA8_SRGB, Self::BGRA8_UNORM]
    }
}

impl From<vk::SurfaceFormatKHR> for VkSurfaceFormat {
    fn from(f: vk::SurfaceFormatKHR) -> Self {
        Self {
            format: f.format,
            color_space: f.color_space,
        }
    }
}

/// Render target for one swapchain image: its color view, a depth buffer and the framebuffer
/// tying both to the render pass.
pub struct VkTarget {
    pub view: vk::ImageView,
    pub depth: DepthImage,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

pub fn to_vk_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub fn from_vk_present_mode(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

/// Converts raw surface capabilities; `u32::MAX` extents and a zero max image count are the
/// "no constraint" sentinels.
pub fn capabilities_from_vk(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    modes: &[vk::PresentModeKHR],
) -> SurfaceCapabilities<VkSurfaceFormat> {
    let size = |e: vk::Extent2D| RenderSize {
        width: e.width,
        height: e.height,
    };
    SurfaceCapabilities {
        min_image_count: caps.min_image_count,
        max_image_count: (caps.max_image_count != 0).then_some(caps.max_image_count),
        current_extent: (caps.current_extent.width != u32::MAX).then(|| size(caps.current_extent)),
        min_extent: size(caps.min_image_extent),
        max_extent: size(caps.max_image_extent),
        formats: formats.iter().copied().map(VkSurfaceFormat::from).collect(),
        present_modes: modes.iter().copied().filter_map(from_vk_present_mode).collect(),
    }
}

/// Nanoseconds for a Vulkan wait; `Duration::MAX` and anything past `u64::MAX` ns mean forever.
pub fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Device, queue, command pool and the render pass every target is built against.
pub struct VkBackend {
    command_pool: vk::CommandPool,
    render_pass: vk::RenderPass,
    color_format: VkSurfaceFormat,
    depth_format: vk::Format,
    ctx: VkContext,
}

impl VkBackend {
    /// `color_format` is fixed for the backend's lifetime; the render pass is built for it.
    pub fn new(ctx: VkContext, color_format: VkSurfaceFormat) -> RenderResult<Self> {
        let depth_format = ctx.pick_depth_format()?;
        let render_pass = create_render_pass(&ctx.device, color_format.format, depth_format)?;

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let command_pool = match unsafe { ctx.device.create_command_pool(&pool_info, None) } {
            Ok(p) => p,
            Err(e) => {
                unsafe { ctx.device.destroy_render_pass(render_pass, None) };
                return Err(RenderError::resource("command pool", e));
            }
        };
        info!(
            "render pass for {:?}/{:?}, depth {:?}",
            color_format.format, color_format.color_space, depth_format
        );
        Ok(Self {
            command_pool,
            render_pass,
            color_format,
            depth_format,
            ctx,
        })
    }

    #[inline]
    pub fn context(&self) -> &VkContext {
        &self.ctx
    }

    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.ctx.device
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn color_format(&self) -> VkSurfaceFormat {
        self.color_format
    }

    /// Surface formats as reported, before negotiation.
    pub fn query_formats(ctx: &VkContext) -> RenderResult<Vec<VkSurfaceFormat>> {
        let formats = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_formats(ctx.phys, ctx.surface)
        }
        .map_err(|e| RenderError::device("surface format query", e))?;
        Ok(formats.into_iter().map(VkSurfaceFormat::from).collect())
    }

    fn composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
        [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::INHERIT,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        ]
        .into_iter()
        .find(|&a| caps.supported_composite_alpha.contains(a))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            d.device_wait_idle().ok();
            d.destroy_command_pool(self.command_pool, None);
            d.destroy_render_pass(self.render_pass, None);
        }
        // ctx drops next: device, surface, instance
    }
}

impl Backend for VkBackend {
    type Semaphore = vk::Semaphore;
    type Fence = vk::Fence;
    type CommandBuffer = vk::CommandBuffer;
    type Swapchain = vk::SwapchainKHR;
    type Image = vk::Image;
    type Format = VkSurfaceFormat;
    type Target = VkTarget;

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let ci = vk::SemaphoreCreateInfo::default();
        unsafe { self.device().create_semaphore(&ci, None) }
            .map_err(|e| RenderError::resource("semaphore", e))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device().destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device().create_fence(&ci, None) }
            .map_err(|e| RenderError::resource("fence", e))
    }

    fn wait_fence(&self, fence: vk::Fence, timeout: Duration) -> RenderResult<bool> {
        match unsafe { self.device().wait_for_fences(&[fence], true, timeout_ns(timeout)) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(RenderError::device("fence wait", e)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.device().reset_fences(&[fence]) }
            .map_err(|e| RenderError::device("fence reset", e))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device().destroy_fence(fence, None) }
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device().device_wait_idle() }
            .map_err(|e| RenderError::device("device idle wait", e))
    }

    fn allocate_command_buffer(&self) -> RenderResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        unsafe { self.device().allocate_command_buffers(&alloc_info) }
            .map_err(|e| RenderError::resource("command buffer", e))?
            .pop()
            .ok_or(RenderError::Protocol("driver allocated no command buffer"))
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        unsafe {
            self.device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| RenderError::device("command buffer reset", e))
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { self.device().begin_command_buffer(cmd, &begin) }
            .map_err(|e| RenderError::device("command buffer begin", e))
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        unsafe { self.device().end_command_buffer(cmd) }
            .map_err(|e| RenderError::device("command buffer end", e))
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device().free_command_buffers(self.command_pool, &[cmd]) }
    }

    fn surface_capabilities(&self) -> RenderResult<SurfaceCapabilities<VkSurfaceFormat>> {
        let c = &self.ctx;
        let query = |e: vk::Result| RenderError::device("surface capability query", e);
        let (caps, formats, modes) = unsafe {
            (
                c.surface_loader
                    .get_physical_device_surface_capabilities(c.phys, c.surface)
                    .map_err(query)?,
                c.surface_loader
                    .get_physical_device_surface_formats(c.phys, c.surface)
                    .map_err(query)?,
                c.surface_loader
                    .get_physical_device_surface_present_modes(c.phys, c.surface)
                    .map_err(query)?,
            )
        };
        Ok(capabilities_from_vk(&caps, &formats, &modes))
    }

    fn create_swapchain(
        &self,
        request: &SwapchainRequest<VkSurfaceFormat>,
        old: Option<vk::SwapchainKHR>,
    ) -> RenderResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let c = &self.ctx;
        let caps = unsafe {
            c.surface_loader
                .get_physical_device_surface_capabilities(c.phys, c.surface)
        }
        .map_err(|e| RenderError::device("surface capability query", e))?;

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: c.surface,
            min_image_count: request.image_count,
            image_format: request.format.format,
            image_color_space: request.format.color_space,
            image_extent: vk::Extent2D {
                width: request.extent.width,
                height: request.extent.height,
            },
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: caps.current_transform,
            composite_alpha: Self::composite_alpha(&caps),
            present_mode: to_vk_present_mode(request.present_mode),
            clipped: vk::TRUE,
            old_swapchain: old.unwrap_or_default(),
            ..Default::default()
        };
        let swapchain = unsafe { c.swapchain_loader.create_swapchain(&swap_info, None) }
            .map_err(|e| match e {
                vk::Result::ERROR_SURFACE_LOST_KHR | vk::Result::ERROR_DEVICE_LOST => {
                    RenderError::device("swapchain creation", e)
                }
                e => RenderError::resource("swapchain", e),
            })?;
        match unsafe { c.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => {
                debug!("swapchain has {} images", images.len());
                Ok((swapchain, images))
            }
            Err(e) => {
                unsafe { c.swapchain_loader.destroy_swapchain(swapchain, None) };
                Err(RenderError::device("swapchain image query", e))
            }
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.ctx.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: Duration,
        signal: vk::Semaphore,
    ) -> RenderResult<Acquire> {
        let res = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                swapchain,
                timeout_ns(timeout),
                signal,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(Acquire::Timeout),
            Err(e) => Err(RenderError::device("image acquire", e)),
        }
    }

    fn create_target(
        &self,
        image: vk::Image,
        format: VkSurfaceFormat,
        extent: RenderSize,
    ) -> RenderResult<VkTarget> {
        let d = self.device();
        let extent = vk::Extent2D {
            width: extent.width,
            height: extent.height,
        };
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: format.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = unsafe { d.create_image_view(&iv_info, None) }
            .map_err(|e| RenderError::resource("swapchain image view", e))?;

        let depth = match DepthImage::new(&self.ctx, self.depth_format, extent) {
            Ok(depth) => depth,
            Err(e) => {
                unsafe { d.destroy_image_view(view, None) };
                return Err(e);
            }
        };

        let attachments = [view, depth.view];
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: self.render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        match unsafe { d.create_framebuffer(&fb_info, None) } {
            Ok(framebuffer) => Ok(VkTarget {
                view,
                depth,
                framebuffer,
                extent,
            }),
            Err(e) => {
                depth.destroy(d);
                unsafe { d.destroy_image_view(view, None) };
                Err(RenderError::resource("framebuffer", e))
            }
        }
    }

    fn destroy_target(&self, target: VkTarget) {
        let d = self.device();
        unsafe {
            d.destroy_framebuffer(target.framebuffer, None);
            d.destroy_image_view(target.view, None);
        }
        target.depth.destroy(d);
    }
}

impl Queue<VkBackend> for VkBackend {
    fn submit(&self, submission: &Submission<'_, VkBackend>) -> RenderResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = submission.wait.iter().map(|(s, _)| *s).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = submission
            .wait
            .iter()
            .map(|(_, stages)| stage_flags(*stages))
            .collect();
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: submission.command_buffers.len() as u32,
            p_command_buffers: submission.command_buffers.as_ptr(),
            signal_semaphore_count: submission.signal.len() as u32,
            p_signal_semaphores: submission.signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device().queue_submit(
                self.ctx.queue,
                std::slice::from_ref(&submit),
                submission.fence.unwrap_or_default(),
            )
        }
        .map_err(|e| RenderError::device("queue submit", e))
    }

    fn present(&self, presentation: &Presentation<'_, VkBackend>) -> RenderResult<PresentStatus> {
        let swapchains = [presentation.swapchain];
        let indices = [presentation.image_index];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: presentation.wait.len() as u32,
            p_wait_semaphores: presentation.wait.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        match unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.queue, &present)
        } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(RenderError::device("present", e)),
        }
    }
}
