// SPDX-License-Identifier: CEPL-1.0
//! Swapchain rebuild.
//!
//! STRICT ORDER:
//! 1) Stall on platform events while the surface extent is zero (minimized window)
//! 2) Wait for device idle; nothing in flight may still reference the old generation
//! 3) Destroy the old render targets
//! 4) Create the new swapchain (old one as hint), then destroy the old swapchain
//! 5) Create render targets for the new images
//! Frame-slot rotation is not touched.

use tracing::{debug, info};

use crate::backend::{Backend, HostStatus, SurfaceHost, SwapchainRequest};
use crate::error::{RenderError, RenderResult};
use crate::swapchain::{negotiate, Surface, Swapchain};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt { generation: u64 },
    /// The host shut down while the surface was zero-sized; nothing was destroyed.
    HostClosed,
}

/// Blocks on host events until the surface has a usable extent.
fn wait_for_usable_extent<B, H>(
    backend: &B,
    host: &mut H,
    surface: &Surface<B>,
) -> RenderResult<Option<SwapchainRequest<B::Format>>>
where
    B: Backend + ?Sized,
    H: SurfaceHost + ?Sized,
{
    let mut stalled = false;
    loop {
        let caps = backend.surface_capabilities()?;
        let request = negotiate(&caps, surface.config(), host.drawable_size())?;
        if !request.extent.is_degenerate() {
            if stalled {
                info!(
                    "surface usable again at {}x{}",
                    request.extent.width, request.extent.height
                );
            }
            return Ok(Some(request));
        }
        if !stalled {
            info!("surface extent is zero, waiting for events");
            stalled = true;
        }
        if host.wait_events() == HostStatus::Closing {
            return Ok(None);
        }
    }
}

pub fn rebuild_surface<B, H>(
    backend: &B,
    host: &mut H,
    surface: &mut Surface<B>,
) -> RenderResult<RebuildOutcome>
where
    B: Backend + ?Sized,
    H: SurfaceHost + ?Sized,
{
    // 1) stall
    let Some(request) = wait_for_usable_extent(backend, host, surface)? else {
        return Ok(RebuildOutcome::HostClosed);
    };

    // 2) device idle
    backend.wait_idle()?;

    // 3) old targets
    let old_format = surface.swapchain().format();
    let old_handle = surface.swapchain().handle();
    let generation = surface.swapchain().generation() + 1;
    surface.current_mut().destroy_targets(backend);

    // 4) new swapchain, then the old one goes
    let hint = surface.config().reuse_old_swapchain.then_some(old_handle);
    let mut next = Swapchain::create(backend, &request, hint, generation)?;
    if next.format() != old_format {
        let new_format = next.format();
        next.destroy(backend);
        return Err(RenderError::config(format!(
            "surface format changed across rebuild ({old_format:?} -> {new_format:?})"
        )));
    }
    let old = surface.replace(next);
    old.destroy(backend);

    // 5) new targets
    surface.current_mut().create_targets(backend)?;
    debug!(
        "rebuild complete: gen {generation}, {} targets",
        surface.swapchain().targets().len()
    );
    Ok(RebuildOutcome::Rebuilt { generation })
}
