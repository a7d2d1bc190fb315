// SPDX-License-Identifier: CEPL-1.0
//! Binary semaphores and fences.
//!
//! Semaphores order GPU work against other GPU work and are never inspected from the CPU.
//! Fences are the only primitive the render thread waits on.

use std::time::Duration;

use crate::backend::Backend;
use crate::error::{RenderError, RenderResult};

pub struct Semaphore<B: Backend + ?Sized> {
    handle: B::Semaphore,
}

impl<B: Backend + ?Sized> Semaphore<B> {
    /// Always created unsignaled.
    pub fn new(backend: &B) -> RenderResult<Self> {
        Ok(Self {
            handle: backend.create_semaphore()?,
        })
    }

    #[inline]
    pub fn handle(&self) -> B::Semaphore {
        self.handle
    }

    /// Caller guarantees no pending GPU operation still references the semaphore.
    pub fn destroy(self, backend: &B) {
        backend.destroy_semaphore(self.handle);
    }
}

pub struct Fence<B: Backend + ?Sized> {
    handle: B::Fence,
    // set by a successful wait, cleared by reset
    observed: bool,
}

impl<B: Backend + ?Sized> Fence<B> {
    /// `signaled` bootstraps the first wait of a frame slot.
    pub fn new(backend: &B, signaled: bool) -> RenderResult<Self> {
        Ok(Self {
            handle: backend.create_fence(signaled)?,
            observed: false,
        })
    }

    #[inline]
    pub fn handle(&self) -> B::Fence {
        self.handle
    }

    /// Whether a wait has seen the fence signaled since the last reset.
    #[inline]
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    /// Blocks until the fence signals. A timeout is fatal.
    pub fn wait(&mut self, backend: &B, timeout: Duration) -> RenderResult<()> {
        if !backend.wait_fence(self.handle, timeout)? {
            return Err(RenderError::Timeout {
                what: "frame fence wait",
                timeout,
            });
        }
        self.observed = true;
        Ok(())
    }

    /// Only legal after [`Fence::wait`] observed the signal.
    pub fn reset(&mut self, backend: &B) -> RenderResult<()> {
        if !self.observed {
            return Err(RenderError::Protocol(
                "fence reset before a wait observed it signaled",
            ));
        }
        backend.reset_fence(self.handle)?;
        self.observed = false;
        Ok(())
    }

    pub fn destroy(self, backend: &B) {
        backend.destroy_fence(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{Event, MockBackend};

    #[test]
    fn reset_requires_observed_signal() {
        let gpu = MockBackend::new();
        let mut fence = Fence::new(&gpu, true).unwrap();
        let err = fence.reset(&gpu).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        fence.wait(&gpu, Duration::MAX).unwrap();
        assert!(fence.is_observed());
        fence.reset(&gpu).unwrap();
        assert!(!fence.is_observed());
        fence.destroy(&gpu);
        assert_eq!(gpu.live().fences, 0);
    }

    #[test]
    fn waiting_on_a_fence_nobody_will_signal_times_out() {
        let gpu = MockBackend::new();
        let mut fence = Fence::new(&gpu, false).unwrap();
        let err = fence.wait(&gpu, Duration::from_millis(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(gpu
            .events()
            .iter()
            .any(|e| matches!(e, Event::WaitFence { signaled: false, .. })));
    }

    #[test]
    fn semaphores_are_tracked_until_destroyed() {
        let gpu = MockBackend::new();
        let a = Semaphore::new(&gpu).unwrap();
        let b = Semaphore::new(&gpu).unwrap();
        assert_ne!(a.handle(), b.handle());
        assert_eq!(gpu.live().semaphores, 2);
        a.destroy(&gpu);
        b.destroy(&gpu);
        assert_eq!(gpu.live().semaphores, 0);
    }
}
