// SPDX-License-Identifier: CEPL-1.0
//! The narrow seams the frame protocol drives: a device, a queue and a surface host.
//!
//! Handles are plain `Copy` values. Nothing in this crate destroys a handle implicitly;
//! ownership is expressed by the wrapper types in [`crate::sync`], [`crate::command`] and
//! [`crate::swapchain`], each with an explicit `destroy(self, backend)`.

use std::fmt::Debug;
use std::time::Duration;

use crate::error::RenderResult;
use crate::submit::{Presentation, Submission};
use crate::RenderSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    /// Always supported by a conforming presentation engine.
    Fifo,
    FifoRelaxed,
}

/// What the presentation engine reports for a surface.
#[derive(Clone, Debug)]
pub struct SurfaceCapabilities<F> {
    pub min_image_count: u32,
    /// `None` when the platform imposes no upper bound.
    pub max_image_count: Option<u32>,
    /// `None` is the "size determined by the swapchain" sentinel.
    pub current_extent: Option<RenderSize>,
    pub min_extent: RenderSize,
    pub max_extent: RenderSize,
    pub formats: Vec<F>,
    pub present_modes: Vec<PresentMode>,
}

/// Realized swapchain parameters handed to [`Backend::create_swapchain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainRequest<F> {
    pub image_count: u32,
    pub format: F,
    pub extent: RenderSize,
    pub present_mode: PresentMode,
}

/// Result of asking the presentation engine for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// The image may be rendered. `suboptimal` asks for a rebuild before the next acquire.
    Image { index: u32, suboptimal: bool },
    /// Nothing was acquired and the swapchain must be rebuilt.
    OutOfDate,
    /// No image became available within the timeout.
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }
}

/// A logical device as seen by the frame protocol.
///
/// Methods take `&self`; a backend is used from the single render thread only.
pub trait Backend {
    type Semaphore: Copy + Debug;
    type Fence: Copy + Debug;
    type CommandBuffer: Copy + Debug;
    type Swapchain: Copy + Debug;
    type Image: Copy + Debug;
    type Format: Copy + Debug + PartialEq;
    /// Per-image swapchain-dependent resources (views, attachments, framebuffer).
    type Target;

    fn create_semaphore(&self) -> RenderResult<Self::Semaphore>;
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);

    fn create_fence(&self, signaled: bool) -> RenderResult<Self::Fence>;
    /// Returns `Ok(false)` if `timeout` elapsed before the fence signaled.
    fn wait_fence(&self, fence: Self::Fence, timeout: Duration) -> RenderResult<bool>;
    fn reset_fence(&self, fence: Self::Fence) -> RenderResult<()>;
    fn destroy_fence(&self, fence: Self::Fence);

    /// Blocks until every queue of the device is drained.
    fn wait_idle(&self) -> RenderResult<()>;

    fn allocate_command_buffer(&self) -> RenderResult<Self::CommandBuffer>;
    fn reset_command_buffer(&self, cmd: Self::CommandBuffer) -> RenderResult<()>;
    fn begin_command_buffer(&self, cmd: Self::CommandBuffer) -> RenderResult<()>;
    fn end_command_buffer(&self, cmd: Self::CommandBuffer) -> RenderResult<()>;
    fn free_command_buffer(&self, cmd: Self::CommandBuffer);

    fn surface_capabilities(&self) -> RenderResult<SurfaceCapabilities<Self::Format>>;
    /// `old` is only a reuse hint; the caller destroys it afterwards.
    fn create_swapchain(
        &self,
        request: &SwapchainRequest<Self::Format>,
        old: Option<Self::Swapchain>,
    ) -> RenderResult<(Self::Swapchain, Vec<Self::Image>)>;
    fn destroy_swapchain(&self, swapchain: Self::Swapchain);
    fn acquire_next_image(
        &self,
        swapchain: Self::Swapchain,
        timeout: Duration,
        signal: Self::Semaphore,
    ) -> RenderResult<Acquire>;

    fn create_target(
        &self,
        image: Self::Image,
        format: Self::Format,
        extent: RenderSize,
    ) -> RenderResult<Self::Target>;
    fn destroy_target(&self, target: Self::Target);
}

/// The two queue operations of a frame. Kept apart from [`Backend`] so tests can observe
/// exactly what was submitted and presented.
pub trait Queue<B: Backend + ?Sized> {
    fn submit(&self, submission: &Submission<'_, B>) -> RenderResult<()>;
    fn present(&self, presentation: &Presentation<'_, B>) -> RenderResult<PresentStatus>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostStatus {
    Running,
    Closing,
}

/// The windowing side of the presentation surface.
pub trait SurfaceHost {
    /// Drawable size in physical pixels; zero in either dimension while minimized.
    fn drawable_size(&self) -> RenderSize;
    /// Returns whether a resize was observed since the last call and clears the flag.
    fn take_resize_request(&mut self) -> bool;
    /// Blocks until platform events were processed.
    fn wait_events(&mut self) -> HostStatus;
}
