// SPDX-License-Identifier: CEPL-1.0
//! In-memory backend, queue and host used by the unit tests.
//!
//! The mock GPU completes work lazily: a submitted fence signals the moment the CPU waits on
//! it. A fence that was reset and never submitted never signals, so a wait on it reports a
//! timeout, which is how a lost submission would hang on real hardware.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::backend::{
    Acquire, Backend, HostStatus, PresentMode, PresentStatus, Queue, SurfaceCapabilities,
    SurfaceHost, SwapchainRequest,
};
use crate::error::{RenderError, RenderResult};
use crate::submit::{PipelineStages, Presentation, Submission};
use crate::RenderSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFormat {
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba16Float,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    CreateSemaphore(u64),
    DestroySemaphore(u64),
    CreateFence { fence: u64, signaled: bool },
    WaitFence { fence: u64, signaled: bool },
    ResetFence(u64),
    DestroyFence(u64),
    WaitIdle,
    AllocateCommands(u64),
    ResetCommands(u64),
    BeginCommands(u64),
    EndCommands(u64),
    FreeCommands(u64),
    QueryCapabilities,
    CreateSwapchain { old: Option<u64> },
    DestroySwapchain(u64),
    Acquire { swapchain: u64, signal: u64 },
    CreateTarget(u64),
    DestroyTarget(u64),
    Submit {
        wait: Vec<(u64, PipelineStages)>,
        commands: Vec<u64>,
        signal: Vec<u64>,
        fence: Option<u64>,
    },
    Present {
        wait: Vec<u64>,
        swapchain: u64,
        image_index: u32,
    },
    // logged by test recorders
    Record { slot: usize, image_index: u32 },
    Update { slot: usize, frame: u64 },
}

/// Object kinds whose creation can be scripted to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Create {
    Semaphore,
    Fence,
    CommandBuffer,
    Swapchain,
    Target,
}

impl Create {
    fn what(self) -> &'static str {
        match self {
            Create::Semaphore => "semaphore",
            Create::Fence => "fence",
            Create::CommandBuffer => "command buffer",
            Create::Swapchain => "swapchain",
            Create::Target => "render target",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveCounts {
    pub semaphores: usize,
    pub fences: usize,
    pub command_buffers: usize,
    pub swapchains: usize,
    pub targets: usize,
}

#[derive(Clone, Copy, Debug)]
struct FenceModel {
    signaled: bool,
    pending: bool,
}

struct State {
    next_handle: u64,
    events: Vec<Event>,
    fences: HashMap<u64, FenceModel>,
    semaphores: HashSet<u64>,
    command_buffers: HashSet<u64>,
    swapchains: HashMap<u64, Vec<u64>>,
    targets: HashSet<u64>,
    caps: SurfaceCapabilities<MockFormat>,
    restore_extent: Option<(u32, RenderSize)>,
    acquire_calls: u32,
    present_calls: u32,
    acquire_script: HashMap<u32, Acquire>,
    present_script: HashMap<u32, PresentStatus>,
    create_calls: HashMap<Create, u32>,
    create_failures: HashSet<(Create, u32)>,
    max_in_flight: usize,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Counts the call and fails it when scripted.
    fn check_create(&mut self, kind: Create) -> RenderResult<()> {
        let calls = self.create_calls.entry(kind).or_insert(0);
        *calls += 1;
        if self.create_failures.contains(&(kind, *calls)) {
            return Err(RenderError::resource(
                kind.what(),
                mock_failure("scripted creation failure"),
            ));
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.fences.values().filter(|f| f.pending).count()
    }
}

pub struct MockBackend {
    state: RefCell<State>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                // keep handles visibly distinct from small literal ids used in tests
                next_handle: 100,
                events: Vec::new(),
                fences: HashMap::new(),
                semaphores: HashSet::new(),
                command_buffers: HashSet::new(),
                swapchains: HashMap::new(),
                targets: HashSet::new(),
                caps: SurfaceCapabilities {
                    min_image_count: 2,
                    max_image_count: Some(3),
                    current_extent: None,
                    min_extent: RenderSize {
                        width: 1,
                        height: 1,
                    },
                    max_extent: RenderSize {
                        width: 4096,
                        height: 4096,
                    },
                    formats: vec![MockFormat::Bgra8Unorm, MockFormat::Bgra8Srgb],
                    present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
                },
                restore_extent: None,
                acquire_calls: 0,
                present_calls: 0,
                acquire_script: HashMap::new(),
                present_script: HashMap::new(),
                create_calls: HashMap::new(),
                create_failures: HashSet::new(),
                max_in_flight: 0,
            }),
        }
    }

    pub fn log(&self, event: Event) {
        self.state.borrow_mut().events.push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn live(&self) -> LiveCounts {
        let s = self.state.borrow();
        LiveCounts {
            semaphores: s.semaphores.len(),
            fences: s.fences.len(),
            command_buffers: s.command_buffers.len(),
            swapchains: s.swapchains.len(),
            targets: s.targets.len(),
        }
    }

    /// Highest number of submitted-but-unsignaled fences ever observed.
    pub fn max_in_flight(&self) -> usize {
        self.state.borrow().max_in_flight
    }

    pub fn set_image_counts(&self, min: u32, max: Option<u32>) {
        let mut s = self.state.borrow_mut();
        s.caps.min_image_count = min;
        s.caps.max_image_count = max;
    }

    pub fn set_current_extent(&self, extent: Option<RenderSize>) {
        self.state.borrow_mut().caps.current_extent = extent;
    }

    /// After `queries` more capability queries, the current extent becomes `extent`.
    pub fn restore_extent_after_queries(&self, queries: u32, extent: RenderSize) {
        self.state.borrow_mut().restore_extent = Some((queries, extent));
    }

    pub fn set_formats(&self, formats: Vec<MockFormat>) {
        self.state.borrow_mut().caps.formats = formats;
    }

    /// `call` is 1-based.
    pub fn script_acquire(&self, call: u32, result: Acquire) {
        self.state.borrow_mut().acquire_script.insert(call, result);
    }

    /// `call` is 1-based.
    pub fn script_present(&self, call: u32, status: PresentStatus) {
        self.state.borrow_mut().present_script.insert(call, status);
    }

    /// The `call`-th creation of `kind` (1-based, counted from now on) fails with a
    /// resource error.
    pub fn fail_create(&self, kind: Create, call: u32) {
        let mut s = self.state.borrow_mut();
        let done = s.create_calls.get(&kind).copied().unwrap_or(0);
        s.create_failures.insert((kind, done + call));
    }
}

fn mock_failure(msg: &'static str) -> std::io::Error {
    std::io::Error::other(msg)
}

impl Backend for MockBackend {
    type Semaphore = u64;
    type Fence = u64;
    type CommandBuffer = u64;
    type Swapchain = u64;
    type Image = u64;
    type Format = MockFormat;
    type Target = u64;

    fn create_semaphore(&self) -> RenderResult<u64> {
        let mut s = self.state.borrow_mut();
        s.check_create(Create::Semaphore)?;
        let h = s.handle();
        s.semaphores.insert(h);
        s.events.push(Event::CreateSemaphore(h));
        Ok(h)
    }

    fn destroy_semaphore(&self, semaphore: u64) {
        let mut s = self.state.borrow_mut();
        assert!(s.semaphores.remove(&semaphore), "unknown semaphore");
        s.events.push(Event::DestroySemaphore(semaphore));
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<u64> {
        let mut s = self.state.borrow_mut();
        s.check_create(Create::Fence)?;
        let h = s.handle();
        s.fences.insert(
            h,
            FenceModel {
                signaled,
                pending: false,
            },
        );
        s.events.push(Event::CreateFence { fence: h, signaled });
        Ok(h)
    }

    fn wait_fence(&self, fence: u64, _timeout: Duration) -> RenderResult<bool> {
        let mut s = self.state.borrow_mut();
        let model = s.fences.get_mut(&fence).expect("unknown fence");
        if model.pending {
            model.pending = false;
            model.signaled = true;
        }
        let signaled = model.signaled;
        s.events.push(Event::WaitFence { fence, signaled });
        Ok(signaled)
    }

    fn reset_fence(&self, fence: u64) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        let model = s.fences.get_mut(&fence).expect("unknown fence");
        assert!(!model.pending, "reset of a fence with pending work");
        model.signaled = false;
        s.events.push(Event::ResetFence(fence));
        Ok(())
    }

    fn destroy_fence(&self, fence: u64) {
        let mut s = self.state.borrow_mut();
        let model = s.fences.remove(&fence).expect("unknown fence");
        assert!(!model.pending, "destroyed a fence with pending work");
        s.events.push(Event::DestroyFence(fence));
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        for f in s.fences.values_mut() {
            if f.pending {
                f.pending = false;
                f.signaled = true;
            }
        }
        s.events.push(Event::WaitIdle);
        Ok(())
    }

    fn allocate_command_buffer(&self) -> RenderResult<u64> {
        let mut s = self.state.borrow_mut();
        s.check_create(Create::CommandBuffer)?;
        let h = s.handle();
        s.command_buffers.insert(h);
        s.events.push(Event::AllocateCommands(h));
        Ok(h)
    }

    fn reset_command_buffer(&self, cmd: u64) -> RenderResult<()> {
        self.log(Event::ResetCommands(cmd));
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: u64) -> RenderResult<()> {
        self.log(Event::BeginCommands(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: u64) -> RenderResult<()> {
        self.log(Event::EndCommands(cmd));
        Ok(())
    }

    fn free_command_buffer(&self, cmd: u64) {
        let mut s = self.state.borrow_mut();
        assert!(s.command_buffers.remove(&cmd), "unknown command buffer");
        s.events.push(Event::FreeCommands(cmd));
    }

    fn surface_capabilities(&self) -> RenderResult<SurfaceCapabilities<MockFormat>> {
        let mut s = self.state.borrow_mut();
        if let Some((remaining, extent)) = s.restore_extent {
            if remaining == 0 {
                s.caps.current_extent = Some(extent);
                s.restore_extent = None;
            } else {
                s.restore_extent = Some((remaining - 1, extent));
            }
        }
        s.events.push(Event::QueryCapabilities);
        Ok(s.caps.clone())
    }

    fn create_swapchain(
        &self,
        request: &SwapchainRequest<MockFormat>,
        old: Option<u64>,
    ) -> RenderResult<(u64, Vec<u64>)> {
        let mut s = self.state.borrow_mut();
        s.check_create(Create::Swapchain)?;
        if let Some(old) = old {
            assert!(s.swapchains.contains_key(&old), "stale swapchain hint");
        }
        let h = s.handle();
        let images: Vec<u64> = (0..request.image_count).map(|_| s.handle()).collect();
        s.swapchains.insert(h, images.clone());
        s.events.push(Event::CreateSwapchain { old });
        Ok((h, images))
    }

    fn destroy_swapchain(&self, swapchain: u64) {
        let mut s = self.state.borrow_mut();
        assert!(s.swapchains.remove(&swapchain).is_some(), "unknown swapchain");
        s.events.push(Event::DestroySwapchain(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: u64,
        _timeout: Duration,
        signal: u64,
    ) -> RenderResult<Acquire> {
        let mut s = self.state.borrow_mut();
        s.acquire_calls += 1;
        s.events.push(Event::Acquire { swapchain, signal });
        let call = s.acquire_calls;
        if let Some(scripted) = s.acquire_script.get(&call).copied() {
            return Ok(scripted);
        }
        let count = match s.swapchains.get(&swapchain) {
            Some(images) => images.len() as u32,
            None => {
                return Err(RenderError::device(
                    "acquire",
                    mock_failure("unknown swapchain"),
                ))
            }
        };
        Ok(Acquire::Image {
            index: (call - 1) % count,
            suboptimal: false,
        })
    }

    fn create_target(
        &self,
        _image: u64,
        _format: MockFormat,
        _extent: RenderSize,
    ) -> RenderResult<u64> {
        let mut s = self.state.borrow_mut();
        s.check_create(Create::Target)?;
        let h = s.handle();
        s.targets.insert(h);
        s.events.push(Event::CreateTarget(h));
        Ok(h)
    }

    fn destroy_target(&self, target: u64) {
        let mut s = self.state.borrow_mut();
        assert!(s.targets.remove(&target), "unknown target");
        s.events.push(Event::DestroyTarget(target));
    }
}

impl Queue<MockBackend> for MockBackend {
    fn submit(&self, submission: &Submission<'_, MockBackend>) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        if let Some(fence) = submission.fence {
            let model = s.fences.get_mut(&fence).expect("unknown fence");
            if model.signaled || model.pending {
                return Err(RenderError::device(
                    "queue submit",
                    mock_failure("fence submitted while still signaled"),
                ));
            }
            model.pending = true;
            let in_flight = s.in_flight();
            s.max_in_flight = s.max_in_flight.max(in_flight);
        }
        s.events.push(Event::Submit {
            wait: submission.wait.to_vec(),
            commands: submission.command_buffers.to_vec(),
            signal: submission.signal.to_vec(),
            fence: submission.fence,
        });
        Ok(())
    }

    fn present(&self, presentation: &Presentation<'_, MockBackend>) -> RenderResult<PresentStatus> {
        let mut s = self.state.borrow_mut();
        s.present_calls += 1;
        s.events.push(Event::Present {
            wait: presentation.wait.to_vec(),
            swapchain: presentation.swapchain,
            image_index: presentation.image_index,
        });
        let call = s.present_calls;
        Ok(s
            .present_script
            .get(&call)
            .copied()
            .unwrap_or(PresentStatus::Optimal))
    }
}

pub struct MockHost {
    current: Cell<RenderSize>,
    pending: VecDeque<RenderSize>,
    resized: bool,
    polls: u32,
    close_after: Option<u32>,
}

impl MockHost {
    pub fn new(size: RenderSize) -> Self {
        Self {
            current: Cell::new(size),
            pending: VecDeque::new(),
            resized: false,
            polls: 0,
            close_after: None,
        }
    }

    /// The first size applies now, each later one after one more event poll.
    pub fn script_sizes(&mut self, sizes: impl IntoIterator<Item = RenderSize>) {
        let mut sizes: VecDeque<RenderSize> = sizes.into_iter().collect();
        if let Some(first) = sizes.pop_front() {
            self.current.set(first);
        }
        self.pending = sizes;
    }

    pub fn close_after_polls(&mut self, polls: u32) {
        self.close_after = Some(polls);
    }

    pub fn request_resize(&mut self) {
        self.resized = true;
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl SurfaceHost for MockHost {
    fn drawable_size(&self) -> RenderSize {
        self.current.get()
    }

    fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    fn wait_events(&mut self) -> HostStatus {
        self.polls += 1;
        if let Some(next) = self.pending.pop_front() {
            self.current.set(next);
        }
        match self.close_after {
            Some(n) if self.polls >= n => HostStatus::Closing,
            _ => HostStatus::Running,
        }
    }
}
