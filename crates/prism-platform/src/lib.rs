// SPDX-License-Identifier: CEPL-1.0
//! Window and event pumping for the render thread.
//!
//! The event loop is pumped from the caller's own loop rather than owning it, so the renderer
//! can block inside a swapchain rebuild and pull events while the window is minimized.
use std::time::Duration;

use anyhow::{anyhow, Result};
use prism_render::{HostStatus, RenderSize, SurfaceHost};
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

pub use winit;

struct HostState {
    title: String,
    requested: RenderSize,
    window: Option<Window>,
    size: RenderSize,
    resized: bool,
    closing: bool,
    create_error: Option<String>,
}

impl HostState {
    fn new(title: &str, requested: RenderSize) -> Self {
        Self {
            title: title.to_owned(),
            requested,
            window: None,
            size: requested,
            resized: false,
            closing: false,
            create_error: None,
        }
    }

    fn on_resized(&mut self, width: u32, height: u32) {
        let size = RenderSize { width, height };
        if size == self.size {
            return;
        }
        debug!("resized -> {}x{}", width, height);
        if size.is_degenerate() != self.size.is_degenerate() {
            info!("minimized = {}", size.is_degenerate());
        }
        self.size = size;
        self.resized = true;
    }

    fn on_close(&mut self) {
        if !self.closing {
            info!("close requested");
        }
        self.closing = true;
    }

    fn status(&self) -> HostStatus {
        if self.closing {
            HostStatus::Closing
        } else {
            HostStatus::Running
        }
    }
}

impl ApplicationHandler for HostState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.requested.width,
                self.requested.height,
            ));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let inner = window.inner_size();
                self.size = RenderSize {
                    width: inner.width,
                    height: inner.height,
                };
                info!("window created: {}x{}", inner.width, inner.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() != id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.on_close();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => self.on_resized(size.width, size.height),
            _ => {}
        }
    }
}

/// Owns the event loop and the single window rendered into.
pub struct WindowHost {
    event_loop: EventLoop<()>,
    state: HostState,
}

impl WindowHost {
    /// Opens the window, pumping events until the platform has created it.
    pub fn new(title: &str, size: RenderSize) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let mut host = Self {
            event_loop,
            state: HostState::new(title, size),
        };
        while host.state.window.is_none() {
            if let PumpStatus::Exit(code) = host.pump_with(Some(Duration::ZERO)) {
                return Err(match host.state.create_error.take() {
                    Some(e) => anyhow!("window creation failed: {e}"),
                    None => anyhow!("event loop exited ({code}) before the window opened"),
                });
            }
        }
        Ok(host)
    }

    pub fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    pub fn is_closing(&self) -> bool {
        self.state.closing
    }

    /// Drains pending events without blocking.
    pub fn pump(&mut self) -> HostStatus {
        self.pump_with(Some(Duration::ZERO));
        self.state.status()
    }

    fn pump_with(&mut self, timeout: Option<Duration>) -> PumpStatus {
        let status = self.event_loop.pump_app_events(timeout, &mut self.state);
        if let PumpStatus::Exit(_) = status {
            self.state.on_close();
        }
        status
    }
}

impl SurfaceHost for WindowHost {
    fn drawable_size(&self) -> RenderSize {
        self.state.size
    }

    fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn wait_events(&mut self) -> HostStatus {
        if self.state.closing {
            return HostStatus::Closing;
        }
        self.pump_with(None);
        self.state.status()
    }
}
