//! Codec session: lifecycle state machine, format negotiation and the
//! dual-queue buffer engine over an [`M2mDevice`].
//!
//! One coarse lock serializes every public operation; no operation blocks
//! on the device beyond the single call it issues, and `retrieve` never
//! waits for a completion.

use std::sync::{Mutex, MutexGuard};

use crate::device::{DequeuedBuffer, Direction, M2mDevice, SetFormat};
use crate::error::{CodecError, CodecResult};
use crate::format::{CodecKind, FormatTable, NegotiatedFormat};
use crate::pool::{BufferPool, MAX_POOL_BUFFERS};

/// Session lifecycle: `Closed -> Open -> Configured -> Running`, with stop
/// returning to Configured and close returning to Closed from anywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Closed,
    Open,
    Configured,
    Running,
}

/// Caller-requested configuration applied by [`Session::configure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub input_buffers: u32,
    pub output_buffers: u32,
}

impl SessionConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            input_buffers: 8,
            output_buffers: 8,
        }
    }

    pub fn with_buffers(mut self, input: u32, output: u32) -> Self {
        self.input_buffers = input;
        self.output_buffers = output;
        self
    }
}

/// Negotiated format plus the granted per-direction buffer counts. Present
/// only while the session is Configured or Running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveConfig {
    pub format: NegotiatedFormat,
    pub input_buffers: u32,
    pub output_buffers: u32,
}

/// Completed buffer handed back to the caller by [`Session::retrieve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedBuffer {
    pub direction: Direction,
    pub index: u32,
    pub bytes_used: u32,
    pub flags: u32,
    /// Monotonic capture timestamp in nanoseconds.
    pub timestamp_ns: i64,
}

impl CompletedBuffer {
    fn new(direction: Direction, dequeued: DequeuedBuffer) -> Self {
        Self {
            direction,
            index: dequeued.index,
            bytes_used: dequeued.bytes_used,
            flags: dequeued.flags,
            timestamp_ns: dequeued.timestamp_ns,
        }
    }
}

struct Inner {
    state: LifecycleState,
    table: FormatTable,
    device: Option<Box<dyn M2mDevice>>,
    codec: Option<CodecKind>,
    active: Option<ActiveConfig>,
    input_pool: BufferPool,
    output_pool: BufferPool,
}

impl Inner {
    fn pool_mut(&mut self, direction: Direction) -> &mut BufferPool {
        match direction {
            Direction::Input => &mut self.input_pool,
            Direction::Output => &mut self.output_pool,
        }
    }

    fn pool(&self, direction: Direction) -> &BufferPool {
        match direction {
            Direction::Input => &self.input_pool,
            Direction::Output => &self.output_pool,
        }
    }

    fn device_mut(&mut self) -> &mut dyn M2mDevice {
        // Invariant: the device handle is present whenever state != Closed,
        // and every caller has already checked the state.
        match self.device.as_deref_mut() {
            Some(device) => device,
            None => unreachable!("device handle missing outside Closed"),
        }
    }

    /// Stop both queue directions, logging instead of propagating: teardown
    /// must not be abortable.
    fn stop_streams(&mut self) {
        for direction in Direction::ALL {
            if let Err(e) = self.device_mut().stream_off(direction) {
                log::warn!("stream off {} failed during stop: {}", direction, e);
            }
            self.pool_mut(direction).release_all();
        }
    }

    /// Free both device-side pools, logging device errors.
    fn free_pools(&mut self) {
        for direction in Direction::ALL {
            if !self.pool(direction).is_empty() {
                if let Err(e) = self.device_mut().request_buffers(direction, 0) {
                    log::warn!("freeing {} buffers failed: {}", direction, e);
                }
            }
            self.pool_mut(direction).clear();
        }
    }
}

/// Thread-safe codec session. Multiple threads may call in concurrently;
/// all operations are serialized by one internal lock.
pub struct Session {
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(table: FormatTable) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::Closed,
                table,
                device: None,
                codec: None,
                active: None,
                input_pool: BufferPool::empty(Direction::Input),
                output_pool: BufferPool::empty(Direction::Output),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    pub fn codec(&self) -> Option<CodecKind> {
        self.lock().codec
    }

    pub fn active_config(&self) -> Option<ActiveConfig> {
        self.lock().active
    }

    pub fn pool_capacity(&self, direction: Direction) -> u32 {
        self.lock().pool(direction).capacity()
    }

    /// Take ownership of a freshly opened device and move to Open.
    ///
    /// The device is dropped (closed) again if the codec kind is not in the
    /// session's format table or the device lacks multiplanar M2M streaming.
    pub fn open(&self, kind: CodecKind, device: Box<dyn M2mDevice>) -> CodecResult<()> {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Closed {
            return Err(CodecError::AlreadyOpen);
        }
        if !inner.table.supports(kind) {
            return Err(CodecError::UnsupportedCodec(kind));
        }
        let caps = device.capabilities()?;
        if !caps.m2m_mplane {
            return Err(CodecError::Device {
                code: 0,
                message: format!("driver {} lacks multiplanar M2M streaming", caps.driver),
            });
        }
        inner.device = Some(device);
        inner.codec = Some(kind);
        inner.state = LifecycleState::Open;
        log::info!("session open: codec {} on driver {}", kind, caps.driver);
        Ok(())
    }

    /// Negotiate formats and allocate both buffer pools, moving to
    /// Configured. A failed output-pool allocation rolls the input pool
    /// back, leaving the session Open with zero buffers allocated.
    pub fn configure(&self, config: SessionConfig) -> CodecResult<()> {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Open => {}
            LifecycleState::Closed => return Err(CodecError::NotOpen),
            LifecycleState::Configured | LifecycleState::Running => {
                return Err(CodecError::AlreadyConfigured);
            }
        }
        let kind = inner.codec.ok_or(CodecError::NotOpen)?;
        let format = inner.table.negotiate(kind, config.width, config.height)?;
        for (direction, count) in [
            (Direction::Input, config.input_buffers),
            (Direction::Output, config.output_buffers),
        ] {
            if count == 0 || count > MAX_POOL_BUFFERS {
                return Err(CodecError::AllocationFailed {
                    direction,
                    reason: format!("buffer count {} outside 1..={}", count, MAX_POOL_BUFFERS),
                });
            }
        }

        for (direction, pixel_format) in [
            (Direction::Input, format.input_format),
            (Direction::Output, format.output_format),
        ] {
            let request = SetFormat {
                direction,
                width: format.width,
                height: format.height,
                pixel_format,
                num_planes: pixel_format.plane_count(),
            };
            inner.device_mut().set_format(&request)?;
        }

        let input_granted =
            match allocate(inner.device_mut(), Direction::Input, config.input_buffers) {
                Ok(granted) => granted,
                Err(e) => return Err(e),
            };
        let output_granted =
            match allocate(inner.device_mut(), Direction::Output, config.output_buffers) {
                Ok(granted) => granted,
                Err(e) => {
                    // Roll back the input pool so a failed configure leaves
                    // zero buffers allocated in either direction.
                    if let Err(free_err) = inner.device_mut().request_buffers(Direction::Input, 0) {
                        log::warn!("input pool rollback failed: {}", free_err);
                    }
                    return Err(e);
                }
            };

        inner.input_pool = BufferPool::with_capacity(Direction::Input, input_granted);
        inner.output_pool = BufferPool::with_capacity(Direction::Output, output_granted);
        inner.active = Some(ActiveConfig {
            format,
            input_buffers: input_granted,
            output_buffers: output_granted,
        });
        inner.state = LifecycleState::Configured;
        log::info!(
            "session configured: {}x{} {}->{}, buffers {}/{}",
            format.width,
            format.height,
            format.input_format,
            format.output_format,
            input_granted,
            output_granted
        );
        Ok(())
    }

    /// Enable both queue directions and move to Running. Idempotent when
    /// already Running.
    pub fn start(&self) -> CodecResult<()> {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Configured => {}
            _ => return Err(CodecError::NotConfigured),
        }
        inner.device_mut().stream_on(Direction::Input)?;
        if let Err(e) = inner.device_mut().stream_on(Direction::Output) {
            if let Err(off_err) = inner.device_mut().stream_off(Direction::Input) {
                log::warn!("input stream off after failed start: {}", off_err);
            }
            return Err(e.into());
        }
        inner.state = LifecycleState::Running;
        Ok(())
    }

    /// Disable both queue directions and return to Configured, aborting all
    /// in-flight device work. Idempotent no-op unless Running; stream-off
    /// failures are logged, never propagated.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Running {
            return;
        }
        inner.stop_streams();
        inner.state = LifecycleState::Configured;
    }

    /// Tear the session down to Closed from any state. Always succeeds
    /// locally; device errors during teardown are logged and ignored.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state == LifecycleState::Closed {
            return;
        }
        if inner.state == LifecycleState::Running {
            inner.stop_streams();
        }
        inner.free_pools();
        inner.device = None;
        inner.codec = None;
        inner.active = None;
        inner.state = LifecycleState::Closed;
        log::info!("session closed");
    }

    /// Hand a client-owned slot to the device queue for `direction`.
    pub fn submit(&self, direction: Direction, index: u32) -> CodecResult<()> {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Running {
            return Err(CodecError::NotRunning);
        }
        inner.pool_mut(direction).mark_queued(index)?;
        if let Err(e) = inner.device_mut().queue_buffer(direction, index) {
            // The device rejected the handoff, so the slot stays with the client.
            if let Err(slot_err) = inner.pool_mut(direction).mark_completed(index) {
                log::warn!("slot {} rollback after failed submit: {}", index, slot_err);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Non-blocking dequeue for `direction`: `Ok(Some(_))` hands a completed
    /// slot back to the client, `Ok(None)` means nothing is ready yet and
    /// mutates nothing. Any other device failure is fatal to the session.
    pub fn retrieve(&self, direction: Direction) -> CodecResult<Option<CompletedBuffer>> {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Running {
            return Err(CodecError::NotRunning);
        }
        let dequeued = match inner.device_mut().dequeue_buffer(direction)? {
            Some(buffer) => buffer,
            None => return Ok(None),
        };
        inner
            .pool_mut(direction)
            .mark_completed(dequeued.index)
            .map_err(|_| CodecError::Device {
                code: 0,
                message: format!(
                    "device completed {} slot {} the client already owns",
                    direction, dequeued.index
                ),
            })?;
        Ok(Some(CompletedBuffer::new(direction, dequeued)))
    }
}

/// Request `count` buffers and map any shortfall or device failure to
/// `AllocationFailed`.
fn allocate(device: &mut dyn M2mDevice, direction: Direction, count: u32) -> CodecResult<u32> {
    match device.request_buffers(direction, count) {
        Ok(0) => Err(CodecError::AllocationFailed {
            direction,
            reason: "device granted zero buffers".to_string(),
        }),
        Ok(granted) => Ok(granted),
        Err(e) => Err(CodecError::AllocationFailed {
            direction,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
