// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan renderer: the frame pipeliner and swapchain lifecycle from `prism-render`, driven
//! through `ash`.

use prism_render::{
    FrameOutcome, FramePipeliner, ImageCount, PresentMode, RenderError, RenderResult,
    RenderSettings, RenderSize, Renderer, Surface, SurfaceHost, SwapchainConfig,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

mod backend;
mod context;
mod memory;
mod pipeline;
mod scene;

pub use backend::{VkBackend, VkSurfaceFormat, VkTarget};
pub use context::{InstanceConfig, VkContext, VALIDATION_LAYER};
pub use scene::{FrameUniforms, SceneRecorder};

/// Swapchain settings for a renderer configuration.
pub fn swapchain_config(settings: &RenderSettings) -> SwapchainConfig<VkSurfaceFormat> {
    SwapchainConfig {
        image_count: ImageCount::MinPlus(settings.extra_images),
        preferred_formats: VkSurfaceFormat::preferred(),
        present_mode: settings.present_mode,
        ..Default::default()
    }
}

// STRICT TEARDOWN ORDER (see Drop):
// - pipeliner (waits device idle, then slot semaphores/fences/command buffers)
// - scene (pipeline, descriptors, buffers)
// - surface (render targets, then swapchain)
// - backend (command pool, render pass), then context (device, surface, instance)
pub struct VkRenderer {
    pipeliner: Option<FramePipeliner<VkBackend>>,
    scene: Option<SceneRecorder>,
    surface: Option<Surface<VkBackend>>,
    backend: VkBackend,
}

impl VkRenderer {
    pub fn backend(&self) -> &VkBackend {
        &self.backend
    }

    pub fn frame_number(&self) -> u64 {
        self.pipeliner.as_ref().map_or(0, |p| p.frame_number())
    }

    pub fn extent(&self) -> Option<RenderSize> {
        self.surface.as_ref().map(|s| s.swapchain().extent())
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Some(p) = self.pipeliner.take() {
            if let Err(e) = p.destroy(&self.backend) {
                warn!("teardown: {e}");
            }
        }
        let device = self.backend.device();
        if let Some(scene) = self.scene.take() {
            scene.destroy(device);
        }
        if let Some(surface) = self.surface.take() {
            surface.destroy(&self.backend);
        }
        info!("vulkan renderer destroyed");
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> RenderResult<Self> {
        let ctx = VkContext::new(
            window,
            display,
            &InstanceConfig {
                app_name: settings.app_name.clone(),
                validation: settings.validation,
                layers: Vec::new(),
            },
        )?;

        // the render pass is built once, for the format every swapchain generation will use
        let config = swapchain_config(settings);
        let supported = VkBackend::query_formats(&ctx)?;
        let color_format = prism_render::choose_format(&supported, &config.preferred_formats)
            .ok_or_else(|| RenderError::config("surface reports no supported formats"))?;
        let backend = VkBackend::new(ctx, color_format)?;

        let surface = Surface::new(&backend, size, config)?;
        let pipeliner = match FramePipeliner::new(&backend, settings.pipeliner()) {
            Ok(p) => p,
            Err(e) => {
                surface.destroy(&backend);
                return Err(e);
            }
        };
        let mut scene = match SceneRecorder::new(&backend, pipeliner.frames_in_flight()) {
            Ok(s) => s,
            Err(e) => {
                if let Err(te) = pipeliner.destroy(&backend) {
                    warn!("teardown after failed init: {te}");
                }
                surface.destroy(&backend);
                return Err(e);
            }
        };
        scene.set_clear_color(settings.clear_color);

        let sc = surface.swapchain();
        info!(
            "vulkan renderer ready: {}x{}, {} images, {:?}, {} frames in flight",
            sc.extent().width,
            sc.extent().height,
            sc.image_count(),
            sc.present_mode(),
            pipeliner.frames_in_flight()
        );

        Ok(Self {
            pipeliner: Some(pipeliner),
            scene: Some(scene),
            surface: Some(surface),
            backend,
        })
    }

    fn render(&mut self, host: &mut dyn SurfaceHost) -> RenderResult<FrameOutcome> {
        let (Some(pipeliner), Some(surface), Some(scene)) =
            (&mut self.pipeliner, &mut self.surface, &mut self.scene)
        else {
            return Err(RenderError::Protocol("render after teardown"));
        };
        pipeliner.run_frame(&self.backend, &self.backend, host, surface, scene)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        if let Some(scene) = &mut self.scene {
            scene.set_clear_color(rgba);
        }
    }

    fn set_present_mode(&mut self, mode: PresentMode) {
        let (Some(surface), Some(pipeliner)) = (&mut self.surface, &mut self.pipeliner) else {
            return;
        };
        if surface.config().present_mode != mode {
            info!("present mode -> {mode:?} (rebuild pending)");
            surface.set_present_mode(mode);
            pipeliner.request_rebuild();
        }
    }
}
