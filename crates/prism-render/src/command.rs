// SPDX-License-Identifier: CEPL-1.0
//! Reusable per-slot command buffer with an explicit lifecycle.

use crate::backend::Backend;
use crate::error::{RenderError, RenderResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    Initial,
    Recording,
    Executable,
    /// Submitted; the GPU may still be reading it.
    Pending,
}

pub struct CommandUnit<B: Backend + ?Sized> {
    handle: B::CommandBuffer,
    state: CommandState,
}

impl<B: Backend + ?Sized> CommandUnit<B> {
    pub fn new(backend: &B) -> RenderResult<Self> {
        Ok(Self {
            handle: backend.allocate_command_buffer()?,
            state: CommandState::Initial,
        })
    }

    #[inline]
    pub fn handle(&self) -> B::CommandBuffer {
        self.handle
    }

    #[inline]
    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn reset(&mut self, backend: &B) -> RenderResult<()> {
        if self.state == CommandState::Pending {
            return Err(RenderError::Protocol(
                "command buffer reset while its submission is pending",
            ));
        }
        backend.reset_command_buffer(self.handle)?;
        self.state = CommandState::Initial;
        Ok(())
    }

    pub fn begin(&mut self, backend: &B) -> RenderResult<()> {
        match self.state {
            CommandState::Initial => {}
            CommandState::Pending => {
                return Err(RenderError::Protocol(
                    "command buffer begun while its submission is pending",
                ))
            }
            CommandState::Recording | CommandState::Executable => {
                return Err(RenderError::Protocol(
                    "command buffer begun without an intervening reset",
                ))
            }
        }
        backend.begin_command_buffer(self.handle)?;
        self.state = CommandState::Recording;
        Ok(())
    }

    pub fn end(&mut self, backend: &B) -> RenderResult<()> {
        if self.state != CommandState::Recording {
            return Err(RenderError::Protocol(
                "command buffer ended while not recording",
            ));
        }
        backend.end_command_buffer(self.handle)?;
        self.state = CommandState::Executable;
        Ok(())
    }

    pub(crate) fn mark_submitted(&mut self) -> RenderResult<()> {
        if self.state != CommandState::Executable {
            return Err(RenderError::Protocol(
                "only an executable command buffer can be submitted",
            ));
        }
        self.state = CommandState::Pending;
        Ok(())
    }

    /// Called once the fence guarding the last submission was observed signaled.
    pub(crate) fn retire(&mut self) {
        if self.state == CommandState::Pending {
            self.state = CommandState::Executable;
        }
    }

    pub fn destroy(self, backend: &B) {
        backend.free_command_buffer(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::MockBackend;

    #[test]
    fn records_begin_to_end() {
        let gpu = MockBackend::new();
        let mut cmd = CommandUnit::new(&gpu).unwrap();
        cmd.begin(&gpu).unwrap();
        assert_eq!(cmd.state(), CommandState::Recording);
        cmd.end(&gpu).unwrap();
        assert_eq!(cmd.state(), CommandState::Executable);
        cmd.destroy(&gpu);
        assert_eq!(gpu.live().command_buffers, 0);
    }

    #[test]
    fn end_without_begin_fails() {
        let gpu = MockBackend::new();
        let mut cmd = CommandUnit::new(&gpu).unwrap();
        assert_eq!(cmd.end(&gpu).unwrap_err().kind(), ErrorKind::Protocol);

        cmd.begin(&gpu).unwrap();
        cmd.end(&gpu).unwrap();
        // already ended, no reset in between
        assert_eq!(cmd.end(&gpu).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn pending_buffer_cannot_be_reused_until_retired() {
        let gpu = MockBackend::new();
        let mut cmd = CommandUnit::new(&gpu).unwrap();
        cmd.begin(&gpu).unwrap();
        cmd.end(&gpu).unwrap();
        cmd.mark_submitted().unwrap();

        assert_eq!(cmd.begin(&gpu).unwrap_err().kind(), ErrorKind::Protocol);
        assert_eq!(cmd.reset(&gpu).unwrap_err().kind(), ErrorKind::Protocol);

        cmd.retire();
        cmd.reset(&gpu).unwrap();
        cmd.begin(&gpu).unwrap();
        assert_eq!(cmd.state(), CommandState::Recording);
    }

    #[test]
    fn begin_twice_needs_reset() {
        let gpu = MockBackend::new();
        let mut cmd = CommandUnit::new(&gpu).unwrap();
        cmd.begin(&gpu).unwrap();
        assert_eq!(cmd.begin(&gpu).unwrap_err().kind(), ErrorKind::Protocol);
        cmd.reset(&gpu).unwrap();
        cmd.begin(&gpu).unwrap();
    }
}
