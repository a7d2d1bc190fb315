// SPDX-License-Identifier: CEPL-1.0
//! Queue submission and present wiring for one frame slot. Holds no state.

use bitflags::bitflags;

use crate::backend::{Backend, PresentStatus, Queue};
use crate::error::RenderResult;
use crate::frame::FrameSlot;

bitflags! {
    /// Pipeline stages a semaphore wait blocks.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const VERTEX_INPUT = 1 << 1;
        const VERTEX_SHADER = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 5;
        const TRANSFER = 1 << 6;
        const ALL_COMMANDS = 1 << 7;
    }
}

pub struct Submission<'a, B: Backend + ?Sized> {
    pub wait: &'a [(B::Semaphore, PipelineStages)],
    pub command_buffers: &'a [B::CommandBuffer],
    pub signal: &'a [B::Semaphore],
    pub fence: Option<B::Fence>,
}

pub struct Presentation<'a, B: Backend + ?Sized> {
    pub wait: &'a [B::Semaphore],
    pub swapchain: B::Swapchain,
    pub image_index: u32,
}

/// Submits the slot's command buffer.
///
/// Waits on the image-acquired semaphore only at color output so vertex work can start before
/// the image is free; signals render-finished and arms the slot fence.
pub fn submit_frame<B, Q>(queue: &Q, slot: &FrameSlot<B>) -> RenderResult<()>
where
    B: Backend + ?Sized,
    Q: Queue<B> + ?Sized,
{
    let wait = [(
        slot.image_acquired().handle(),
        PipelineStages::COLOR_ATTACHMENT_OUTPUT,
    )];
    let command_buffers = [slot.commands().handle()];
    let signal = [slot.render_finished().handle()];
    queue.submit(&Submission {
        wait: &wait,
        command_buffers: &command_buffers,
        signal: &signal,
        fence: Some(slot.frame_complete().handle()),
    })
}

pub fn present_frame<B, Q>(
    queue: &Q,
    slot: &FrameSlot<B>,
    swapchain: B::Swapchain,
    image_index: u32,
) -> RenderResult<PresentStatus>
where
    B: Backend + ?Sized,
    Q: Queue<B> + ?Sized,
{
    let wait = [slot.render_finished().handle()];
    queue.present(&Presentation {
        wait: &wait,
        swapchain,
        image_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, MockBackend};

    #[test]
    fn submit_waits_at_color_output_and_arms_the_slot_fence() {
        let gpu = MockBackend::new();
        let slot = FrameSlot::new(&gpu).unwrap();
        // slots start signaled; a fence must be unsignaled when it is submitted
        gpu.reset_fence(slot.frame_complete().handle()).unwrap();
        submit_frame(&gpu, &slot).unwrap();

        let submit = gpu
            .events()
            .into_iter()
            .find_map(|e| match e {
                Event::Submit {
                    wait,
                    commands,
                    signal,
                    fence,
                } => Some((wait, commands, signal, fence)),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            submit.0,
            vec![(
                slot.image_acquired().handle(),
                PipelineStages::COLOR_ATTACHMENT_OUTPUT
            )]
        );
        assert_eq!(submit.1, vec![slot.commands().handle()]);
        assert_eq!(submit.2, vec![slot.render_finished().handle()]);
        assert_eq!(submit.3, Some(slot.frame_complete().handle()));
    }

    #[test]
    fn present_waits_on_render_finished() {
        let gpu = MockBackend::new();
        let slot = FrameSlot::new(&gpu).unwrap();
        let status = present_frame(&gpu, &slot, 7, 2).unwrap();
        assert_eq!(status, PresentStatus::Optimal);
        assert!(gpu.events().contains(&Event::Present {
            wait: vec![slot.render_finished().handle()],
            swapchain: 7,
            image_index: 2,
        }));
    }
}
