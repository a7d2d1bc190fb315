// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight.
//!
//! While the GPU executes frame N the CPU records frame N+1, bounded by the pipelining
//! depth. Each logical frame runs, on the render thread:
//!
//! 0. reconcile: a pending rebuild (or host resize) runs before anything else
//! 1. throttle: wait on the slot's fence; the only per-frame CPU stall
//! 2. acquire: signals the slot's image-acquired semaphore
//!    (out of date: rebuild, frame skipped, counter unchanged)
//! 3. reset the slot's fence, only now that a submit is guaranteed to follow
//! 4. record against the acquired image's render target
//! 5. update per-frame data
//! 6. submit
//! 7. present (suboptimal/out of date: rebuild deferred to the next frame's step 0)
//! 8. advance the frame counter

use std::time::Duration;

use tracing::{debug, info};

use crate::backend::{Acquire, Backend, PresentStatus, Queue, SurfaceHost};
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameSlot, SlotState};
use crate::rebuild::{rebuild_surface, RebuildOutcome};
use crate::submit::{present_frame, submit_frame};
use crate::swapchain::Surface;
use crate::RenderSize;

pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Clone, Copy, Debug)]
pub struct PipelinerConfig {
    /// Pipelining depth, `1..=MAX_FRAMES_IN_FLIGHT`. Default: 2.
    pub frames_in_flight: usize,
    /// Default: `Duration::MAX` (no timeout). Expiry is fatal.
    pub fence_timeout: Duration,
    /// Default: `Duration::MAX` (no timeout). Expiry is fatal.
    pub acquire_timeout: Duration,
}

impl Default for PipelinerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout: Duration::MAX,
            acquire_timeout: Duration::MAX,
        }
    }
}

/// What the recorder sees of the frame being built.
pub struct FrameContext<'a, B: Backend + ?Sized> {
    /// Frame slot, `0..frames_in_flight`. Indexes per-slot resources such as uniform buffers.
    pub slot: usize,
    /// Number of frames presented before this one.
    pub frame: u64,
    pub image_index: u32,
    pub command_buffer: B::CommandBuffer,
    pub target: &'a B::Target,
    pub extent: RenderSize,
}

/// Application side of a frame.
pub trait FrameRecorder<B: Backend + ?Sized> {
    /// Records draw commands; the command buffer is already begun and is ended afterwards.
    fn record(&mut self, backend: &B, frame: &FrameContext<'_, B>) -> RenderResult<()>;

    /// Writes this slot's per-frame data. The slot's previous submission has completed.
    fn update(&mut self, backend: &B, frame: &FrameContext<'_, B>) -> RenderResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        slot: usize,
        image_index: u32,
        status: PresentStatus,
    },
    /// The swapchain was out of date at acquire and has been rebuilt; nothing was submitted.
    Skipped,
    /// The host closed while waiting for a usable surface.
    Closed,
}

pub struct FramePipeliner<B: Backend + ?Sized> {
    slots: Vec<FrameSlot<B>>,
    frame: u64,
    rebuild_pending: bool,
    config: PipelinerConfig,
}

impl<B: Backend + ?Sized> FramePipeliner<B> {
    pub fn new(backend: &B, config: PipelinerConfig) -> RenderResult<Self> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&config.frames_in_flight) {
            return Err(RenderError::config(format!(
                "frames in flight must be 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                config.frames_in_flight
            )));
        }
        let mut slots = Vec::with_capacity(config.frames_in_flight);
        for _ in 0..config.frames_in_flight {
            match FrameSlot::new(backend) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots {
                        slot.destroy(backend);
                    }
                    return Err(e);
                }
            }
        }
        info!(
            "frame pipeliner created with {} frames in flight",
            config.frames_in_flight
        );
        Ok(Self {
            slots,
            frame: 0,
            rebuild_pending: false,
            config,
        })
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next frame will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame % self.slots.len() as u64) as usize
    }

    /// Frames presented so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    /// Slots whose submission has not yet been observed complete.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state() == SlotState::Submitted)
            .count()
    }

    #[inline]
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Schedules a swapchain rebuild at the start of the next frame.
    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot<B>> {
        self.slots.get(index)
    }

    /// Runs one logical frame.
    pub fn run_frame<Q, H, R>(
        &mut self,
        backend: &B,
        queue: &Q,
        host: &mut H,
        surface: &mut Surface<B>,
        recorder: &mut R,
    ) -> RenderResult<FrameOutcome>
    where
        Q: Queue<B> + ?Sized,
        H: SurfaceHost + ?Sized,
        R: FrameRecorder<B> + ?Sized,
    {
        // 0) reconcile
        if host.take_resize_request() {
            self.rebuild_pending = true;
        }
        if self.rebuild_pending {
            match rebuild_surface(backend, host, surface)? {
                RebuildOutcome::Rebuilt { .. } => self.rebuild_pending = false,
                RebuildOutcome::HostClosed => return Ok(FrameOutcome::Closed),
            }
        }

        let index = self.current_slot();
        let slot = &mut self.slots[index];

        // 1) throttle
        slot.wait_complete(backend, self.config.fence_timeout)?;

        // 2) acquire
        let acquired = surface.swapchain().acquire_next_image(
            backend,
            self.config.acquire_timeout,
            slot.image_acquired().handle(),
        )?;
        let image_index = match acquired {
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    debug!("acquire reported suboptimal, rebuilding next frame");
                    self.rebuild_pending = true;
                }
                index
            }
            Acquire::OutOfDate => {
                debug!("acquire reported out of date, skipping frame {}", self.frame);
                return match rebuild_surface(backend, host, surface)? {
                    RebuildOutcome::Rebuilt { .. } => {
                        self.rebuild_pending = false;
                        Ok(FrameOutcome::Skipped)
                    }
                    RebuildOutcome::HostClosed => Ok(FrameOutcome::Closed),
                };
            }
            Acquire::Timeout => {
                return Err(RenderError::Timeout {
                    what: "swapchain image acquire",
                    timeout: self.config.acquire_timeout,
                })
            }
        };

        let swapchain = surface.swapchain();
        let target = swapchain.target(image_index).ok_or(RenderError::Protocol(
            "acquired image index has no render target",
        ))?;

        // 3) reset fence, 4) record
        slot.begin_recording(backend)?;
        let ctx = FrameContext {
            slot: index,
            frame: self.frame,
            image_index,
            command_buffer: slot.commands().handle(),
            target,
            extent: swapchain.extent(),
        };
        recorder.record(backend, &ctx)?;
        slot.end_recording(backend)?;

        // 5) per-frame data
        recorder.update(backend, &ctx)?;

        // 6) submit
        submit_frame(queue, slot)?;
        slot.mark_submitted()?;

        // 7) present
        let status = present_frame(queue, slot, swapchain.handle(), image_index)?;
        if status.needs_rebuild() {
            debug!("present reported {status:?}, rebuilding next frame");
            self.rebuild_pending = true;
        }
        if host.take_resize_request() {
            self.rebuild_pending = true;
        }

        // 8) advance
        self.frame += 1;
        Ok(FrameOutcome::Presented {
            slot: index,
            image_index,
            status,
        })
    }

    /// Waits for device idle, then destroys every slot.
    pub fn destroy(self, backend: &B) -> RenderResult<()> {
        backend.wait_idle()?;
        for slot in self.slots {
            slot.destroy(backend);
        }
        Ok(())
    }
}
