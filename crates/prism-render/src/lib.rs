// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral frame pipelining and swapchain lifecycle.
//!
//! A [`FramePipeliner`] keeps up to [`MAX_FRAMES_IN_FLIGHT`] frames queued on the GPU while the
//! CPU records the next one, and a [`Surface`] owns the current swapchain generation, rebuilt
//! through [`rebuild_surface`] when the platform reports it stale. Both drive a [`Backend`], so
//! the protocol is tested here against an in-memory device and run for real by `prism-render-vk`.
use std::time::Duration;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod backend;
mod command;
mod error;
mod frame;
mod pipeliner;
mod rebuild;
mod submit;
mod swapchain;
mod sync;

#[cfg(test)]
mod testing;

pub use backend::{
    Acquire, Backend, HostStatus, PresentMode, PresentStatus, Queue, SurfaceCapabilities,
    SurfaceHost, SwapchainRequest,
};
pub use command::{CommandState, CommandUnit};
pub use error::{BackendError, ErrorKind, RenderError, RenderResult};
pub use frame::{FrameSlot, SlotState};
pub use pipeliner::{
    FrameContext, FrameOutcome, FramePipeliner, FrameRecorder, PipelinerConfig,
    MAX_FRAMES_IN_FLIGHT,
};
pub use rebuild::{rebuild_surface, RebuildOutcome};
pub use submit::{present_frame, submit_frame, PipelineStages, Presentation, Submission};
pub use swapchain::{
    choose_extent, choose_format, choose_image_count, choose_present_mode, negotiate,
    ImageCount, Surface, Swapchain, SwapchainConfig,
};
pub use sync::{Fence, Semaphore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// Zero in either dimension: nothing can be presented (e.g. minimized window).
    #[inline]
    pub fn is_degenerate(self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn aspect(self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Everything a renderer needs at construction.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub present_mode: PresentMode,
    pub frames_in_flight: usize,
    /// Images requested above the platform minimum.
    pub extra_images: u32,
    pub fence_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Enables the validation layer; missing layer is a configuration error.
    pub validation: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        let pipeliner = PipelinerConfig::default();
        Self {
            app_name: "prism".to_owned(),
            clear_color: [0.08, 0.09, 0.12, 1.0],
            present_mode: PresentMode::Fifo,
            frames_in_flight: pipeliner.frames_in_flight,
            extra_images: 1,
            fence_timeout: pipeliner.fence_timeout,
            acquire_timeout: pipeliner.acquire_timeout,
            validation: cfg!(debug_assertions),
        }
    }
}

impl RenderSettings {
    pub fn pipeliner(&self) -> PipelinerConfig {
        PipelinerConfig {
            frames_in_flight: self.frames_in_flight,
            fence_timeout: self.fence_timeout,
            acquire_timeout: self.acquire_timeout,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> RenderResult<Self>
    where
        Self: Sized;

    /// Runs one frame against the host's current surface state.
    fn render(&mut self, host: &mut dyn SurfaceHost) -> RenderResult<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    /// Takes effect through a swapchain rebuild at the next frame.
    fn set_present_mode(&mut self, mode: PresentMode);
    fn set_vsync(&mut self, on: bool) {
        self.set_present_mode(if on {
            PresentMode::Fifo
        } else {
            PresentMode::Immediate
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_sizes() {
        assert!(RenderSize {
            width: 0,
            height: 600
        }
        .is_degenerate());
        assert!(RenderSize {
            width: 800,
            height: 0
        }
        .is_degenerate());
        assert!(!RenderSize {
            width: 1,
            height: 1
        }
        .is_degenerate());
    }

    #[test]
    fn default_settings_match_pipeliner_defaults() {
        let s = RenderSettings::default();
        let p = s.pipeliner();
        assert_eq!(p.frames_in_flight, 2);
        assert_eq!(p.fence_timeout, Duration::MAX);
        assert_eq!(s.present_mode, PresentMode::Fifo);
    }
}
