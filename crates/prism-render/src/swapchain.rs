// SPDX-License-Identifier: CEPL-1.0
//! Presentable surface: negotiation against the platform's capabilities, one swapchain
//! generation with its render targets, and the [`Surface`] that owns the current generation.

use std::time::Duration;

use tracing::{debug, info};

use crate::backend::{Acquire, Backend, PresentMode, SurfaceCapabilities, SwapchainRequest};
use crate::error::{RenderError, RenderResult};
use crate::RenderSize;

/// How many presentable images to ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageCount {
    /// The platform minimum plus this many extra images.
    MinPlus(u32),
    /// At least this many, raised to the platform minimum if needed.
    AtLeast(u32),
}

impl Default for ImageCount {
    fn default() -> Self {
        ImageCount::MinPlus(1)
    }
}

/// Swapchain creation settings.
#[derive(Clone, Debug)]
pub struct SwapchainConfig<F> {
    /// Default: `MinPlus(1)`.
    pub image_count: ImageCount,
    /// Tried in order; empty means "whatever the platform lists first".
    pub preferred_formats: Vec<F>,
    /// Default: `Fifo`. Falls back to `Fifo` when unsupported.
    pub present_mode: PresentMode,
    /// Pass the previous swapchain as a reuse hint on rebuild. Default: `true`.
    pub reuse_old_swapchain: bool,
}

impl<F> Default for SwapchainConfig<F> {
    fn default() -> Self {
        Self {
            image_count: ImageCount::default(),
            preferred_formats: Vec::new(),
            present_mode: PresentMode::Fifo,
            reuse_old_swapchain: true,
        }
    }
}

pub fn choose_image_count<F>(caps: &SurfaceCapabilities<F>, request: ImageCount) -> u32 {
    let wanted = match request {
        ImageCount::MinPlus(extra) => caps.min_image_count.saturating_add(extra),
        ImageCount::AtLeast(n) => n.max(caps.min_image_count),
    };
    match caps.max_image_count {
        Some(max) => wanted.min(max),
        None => wanted,
    }
}

/// The platform's current extent when it dictates one, else `requested` clamped to the
/// supported range. A zero-sized request (minimized window) stays zero-sized.
pub fn choose_extent<F>(caps: &SurfaceCapabilities<F>, requested: RenderSize) -> RenderSize {
    if let Some(current) = caps.current_extent {
        return current;
    }
    if requested.is_degenerate() {
        return requested;
    }
    RenderSize {
        width: requested
            .width
            .clamp(caps.min_extent.width, caps.max_extent.width),
        height: requested
            .height
            .clamp(caps.min_extent.height, caps.max_extent.height),
    }
}

pub fn choose_format<F: Copy + PartialEq>(supported: &[F], preferred: &[F]) -> Option<F> {
    preferred
        .iter()
        .copied()
        .find(|p| supported.contains(p))
        .or_else(|| supported.first().copied())
}

pub fn choose_present_mode(supported: &[PresentMode], wanted: PresentMode) -> PresentMode {
    if supported.contains(&wanted) {
        wanted
    } else {
        PresentMode::Fifo
    }
}

/// Turns capabilities plus settings into the parameters a swapchain is created with.
pub fn negotiate<F: Copy + PartialEq>(
    caps: &SurfaceCapabilities<F>,
    config: &SwapchainConfig<F>,
    requested: RenderSize,
) -> RenderResult<SwapchainRequest<F>> {
    let format = choose_format(&caps.formats, &config.preferred_formats)
        .ok_or_else(|| RenderError::config("surface reports no supported formats"))?;
    if caps.present_modes.is_empty() {
        return Err(RenderError::config("surface reports no present modes"));
    }
    Ok(SwapchainRequest {
        image_count: choose_image_count(caps, config.image_count),
        format,
        extent: choose_extent(caps, requested),
        present_mode: choose_present_mode(&caps.present_modes, config.present_mode),
    })
}

/// One swapchain generation: the presentable images and the targets built on them.
pub struct Swapchain<B: Backend + ?Sized> {
    handle: B::Swapchain,
    format: B::Format,
    extent: RenderSize,
    present_mode: PresentMode,
    images: Vec<B::Image>,
    targets: Vec<B::Target>,
    generation: u64,
}

impl<B: Backend + ?Sized> Swapchain<B> {
    /// Creates the swapchain only; targets come from [`Swapchain::create_targets`].
    pub(crate) fn create(
        backend: &B,
        request: &SwapchainRequest<B::Format>,
        old: Option<B::Swapchain>,
        generation: u64,
    ) -> RenderResult<Self> {
        let (handle, images) = backend.create_swapchain(request, old)?;
        info!(
            "swapchain gen {generation}: {}x{}, {} images, {:?}, {:?}",
            request.extent.width,
            request.extent.height,
            images.len(),
            request.format,
            request.present_mode
        );
        Ok(Self {
            handle,
            format: request.format,
            extent: request.extent,
            present_mode: request.present_mode,
            images,
            targets: Vec::new(),
            generation,
        })
    }

    /// One target per image. On failure the targets already built are destroyed.
    pub(crate) fn create_targets(&mut self, backend: &B) -> RenderResult<()> {
        debug_assert!(self.targets.is_empty());
        let mut targets = Vec::with_capacity(self.images.len());
        for &image in &self.images {
            match backend.create_target(image, self.format, self.extent) {
                Ok(t) => targets.push(t),
                Err(e) => {
                    for t in targets {
                        backend.destroy_target(t);
                    }
                    return Err(e);
                }
            }
        }
        self.targets = targets;
        Ok(())
    }

    pub(crate) fn destroy_targets(&mut self, backend: &B) {
        for t in self.targets.drain(..) {
            backend.destroy_target(t);
        }
    }

    pub fn acquire_next_image(
        &self,
        backend: &B,
        timeout: Duration,
        signal: B::Semaphore,
    ) -> RenderResult<Acquire> {
        backend.acquire_next_image(self.handle, timeout, signal)
    }

    #[inline]
    pub fn handle(&self) -> B::Swapchain {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> B::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> RenderSize {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn target(&self, image_index: u32) -> Option<&B::Target> {
        self.targets.get(image_index as usize)
    }

    pub fn targets(&self) -> &[B::Target] {
        &self.targets
    }

    /// Device must be idle.
    pub fn destroy(mut self, backend: &B) {
        self.destroy_targets(backend);
        backend.destroy_swapchain(self.handle);
    }
}

/// Owner of the current swapchain generation.
pub struct Surface<B: Backend + ?Sized> {
    config: SwapchainConfig<B::Format>,
    current: Swapchain<B>,
}

impl<B: Backend + ?Sized> Surface<B> {
    /// Builds generation 0 at `size`, or at the platform's current extent if it dictates one.
    pub fn new(backend: &B, size: RenderSize, config: SwapchainConfig<B::Format>) -> RenderResult<Self> {
        let caps = backend.surface_capabilities()?;
        let request = negotiate(&caps, &config, size)?;
        if request.extent.is_degenerate() {
            return Err(RenderError::config(
                "cannot create a swapchain for a zero-sized surface",
            ));
        }
        let mut current = Swapchain::create(backend, &request, None, 0)?;
        if let Err(e) = current.create_targets(backend) {
            current.destroy(backend);
            return Err(e);
        }
        debug!("surface ready with {} targets", current.targets().len());
        Ok(Self { config, current })
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain<B> {
        &self.current
    }

    #[inline]
    pub fn config(&self) -> &SwapchainConfig<B::Format> {
        &self.config
    }

    /// Takes effect at the next rebuild.
    pub fn set_present_mode(&mut self, mode: PresentMode) {
        self.config.present_mode = mode;
    }

    pub(crate) fn current_mut(&mut self) -> &mut Swapchain<B> {
        &mut self.current
    }

    pub(crate) fn replace(&mut self, next: Swapchain<B>) -> Swapchain<B> {
        std::mem::replace(&mut self.current, next)
    }

    /// Device must be idle.
    pub fn destroy(self, backend: &B) {
        self.current.destroy(backend);
    }
}
