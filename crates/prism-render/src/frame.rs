// SPDX-License-Identifier: CEPL-1.0
//! Per-slot resources of the frame pipeliner.
//!
//! ```text
//! 1. wait frame_complete       (CPU waits for the previous use of this slot)
//! 2. acquire                   (signals image_acquired)
//! 3. reset frame_complete
//! 4. record commands
//! 5. submit                    (waits image_acquired, signals render_finished + frame_complete)
//! 6. present                   (waits render_finished)
//! ```

use std::time::Duration;

use crate::backend::Backend;
use crate::command::CommandUnit;
use crate::error::RenderResult;
use crate::sync::{Fence, Semaphore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Never used since creation.
    Idle,
    Recording,
    /// Work is queued; the fence has not been observed since.
    Submitted,
    /// The throttle wait saw the fence signal; the slot's resources are free to reuse.
    Complete,
}

pub struct FrameSlot<B: Backend + ?Sized> {
    commands: CommandUnit<B>,
    image_acquired: Semaphore<B>,
    render_finished: Semaphore<B>,
    frame_complete: Fence<B>,
    state: SlotState,
}

impl<B: Backend + ?Sized> FrameSlot<B> {
    /// On failure everything created so far is destroyed again.
    pub fn new(backend: &B) -> RenderResult<Self> {
        let commands = CommandUnit::new(backend)?;
        let image_acquired = match Semaphore::new(backend) {
            Ok(s) => s,
            Err(e) => {
                commands.destroy(backend);
                return Err(e);
            }
        };
        let render_finished = match Semaphore::new(backend) {
            Ok(s) => s,
            Err(e) => {
                image_acquired.destroy(backend);
                commands.destroy(backend);
                return Err(e);
            }
        };
        // signaled so the very first throttle wait returns immediately
        let frame_complete = match Fence::new(backend, true) {
            Ok(f) => f,
            Err(e) => {
                render_finished.destroy(backend);
                image_acquired.destroy(backend);
                commands.destroy(backend);
                return Err(e);
            }
        };
        Ok(Self {
            commands,
            image_acquired,
            render_finished,
            frame_complete,
            state: SlotState::Idle,
        })
    }

    #[inline]
    pub fn commands(&self) -> &CommandUnit<B> {
        &self.commands
    }

    #[inline]
    pub fn image_acquired(&self) -> &Semaphore<B> {
        &self.image_acquired
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore<B> {
        &self.render_finished
    }

    #[inline]
    pub fn frame_complete(&self) -> &Fence<B> {
        &self.frame_complete
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Throttle: blocks until the previous submission from this slot has completed.
    pub(crate) fn wait_complete(&mut self, backend: &B, timeout: Duration) -> RenderResult<()> {
        self.frame_complete.wait(backend, timeout)?;
        self.commands.retire();
        self.state = SlotState::Complete;
        Ok(())
    }

    /// Resets the fence and re-opens the command buffer for recording.
    pub(crate) fn begin_recording(&mut self, backend: &B) -> RenderResult<()> {
        self.frame_complete.reset(backend)?;
        self.commands.reset(backend)?;
        self.commands.begin(backend)?;
        self.state = SlotState::Recording;
        Ok(())
    }

    pub(crate) fn end_recording(&mut self, backend: &B) -> RenderResult<()> {
        self.commands.end(backend)
    }

    pub(crate) fn mark_submitted(&mut self) -> RenderResult<()> {
        self.commands.mark_submitted()?;
        self.state = SlotState::Submitted;
        Ok(())
    }

    /// The device must be idle, or this slot's fence observed signaled.
    pub fn destroy(self, backend: &B) {
        self.commands.destroy(backend);
        self.image_acquired.destroy(backend);
        self.render_finished.destroy(backend);
        self.frame_complete.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit::submit_frame;
    use crate::testing::{Create, MockBackend};
    use crate::ErrorKind;

    #[test]
    fn failed_creation_releases_earlier_objects() {
        let cases = [
            (Create::CommandBuffer, 1),
            (Create::Semaphore, 1),
            (Create::Semaphore, 2),
            (Create::Fence, 1),
        ];
        for (kind, call) in cases {
            let gpu = MockBackend::new();
            gpu.fail_create(kind, call);
            let err = FrameSlot::new(&gpu).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Resource, "{kind:?} #{call}");
            assert_eq!(gpu.live(), Default::default(), "{kind:?} #{call}");
        }
    }

    #[test]
    fn throttle_wait_marks_slot_complete() {
        let gpu = MockBackend::new();
        let mut slot = FrameSlot::new(&gpu).unwrap();
        assert_eq!(slot.state(), SlotState::Idle);

        slot.wait_complete(&gpu, Duration::MAX).unwrap();
        assert_eq!(slot.state(), SlotState::Complete);
        slot.begin_recording(&gpu).unwrap();
        assert_eq!(slot.state(), SlotState::Recording);
        slot.end_recording(&gpu).unwrap();
        submit_frame(&gpu, &slot).unwrap();
        slot.mark_submitted().unwrap();
        assert_eq!(slot.state(), SlotState::Submitted);

        slot.wait_complete(&gpu, Duration::MAX).unwrap();
        assert_eq!(slot.state(), SlotState::Complete);
        slot.destroy(&gpu);
        assert_eq!(gpu.live(), Default::default());
    }
}
