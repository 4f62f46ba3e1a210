//! In-process M2M device used by the demo binary and the test suite.
//!
//! Models the dual-queue contract without any hardware: a queued input slot
//! becomes dequeueable immediately, and each consumed input pairs with one
//! queued output slot to produce a synthesized completion with a monotonic
//! timestamp. Fault injection hooks cover allocation-failure rollback and
//! fatal queue/dequeue errors; an optional frame limit flags the final
//! output buffer so end-of-stream handling can be exercised.

use std::collections::VecDeque;

use crate::device::{
    BUFFER_FLAG_KEYFRAME, BUFFER_FLAG_LAST, DequeuedBuffer, Direction, DeviceCaps, DeviceError,
    DeviceResult, M2mDevice, SetFormat,
};

const ENOMEM: i32 = 12;
const EINVAL: i32 = 22;
const EIO: i32 = 5;

/// Nominal 30fps spacing between synthesized completions.
const FRAME_INTERVAL_NS: i64 = 33_333_333;
/// Every 30th output frame is flagged as a keyframe.
const GOP_LENGTH: u64 = 30;

#[derive(Default)]
struct QueueState {
    format: Option<SetFormat>,
    allocated: u32,
    streaming: bool,
    /// Completions ready to dequeue.
    ready: VecDeque<DequeuedBuffer>,
}

pub struct LoopbackDevice {
    caps: DeviceCaps,
    input: QueueState,
    output: QueueState,
    /// Output slots queued while waiting for an input to pair with.
    waiting_output: VecDeque<u32>,
    /// Inputs consumed but not yet paired with an output slot.
    pending_frames: u32,
    frame_counter: u64,
    clock_ns: i64,
    /// When set, the output completion with this sequence number carries the
    /// end-of-stream flag.
    frame_limit: Option<u64>,
    fail_request: Option<Direction>,
    fail_queue: bool,
    fail_dequeue: Option<Direction>,
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self {
            caps: DeviceCaps {
                driver: "loopback".to_string(),
                m2m_mplane: true,
            },
            input: QueueState::default(),
            output: QueueState::default(),
            waiting_output: VecDeque::new(),
            pending_frames: 0,
            frame_counter: 0,
            clock_ns: 0,
            frame_limit: None,
            fail_request: None,
            fail_queue: false,
            fail_dequeue: None,
        }
    }

    /// Advertise no M2M capability; `open` must reject such a device.
    pub fn without_m2m(mut self) -> Self {
        self.caps.m2m_mplane = false;
        self
    }

    /// Make `request_buffers` for `direction` fail with ENOMEM.
    pub fn fail_request_buffers(mut self, direction: Direction) -> Self {
        self.fail_request = Some(direction);
        self
    }

    /// Make every `queue_buffer` fail with EIO.
    pub fn fail_queue(mut self) -> Self {
        self.fail_queue = true;
        self
    }

    /// Make `dequeue_buffer` for `direction` fail with EIO.
    pub fn fail_dequeue(mut self, direction: Direction) -> Self {
        self.fail_dequeue = Some(direction);
        self
    }

    /// Flag the `frames`-th output completion as the last of the stream.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    fn queue_state(&mut self, direction: Direction) -> &mut QueueState {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    fn input_frame_bytes(&self) -> u32 {
        match self.input.format {
            // NV12: full luma plane plus half-size interleaved chroma.
            Some(f) => f.width * f.height * 3 / 2,
            None => 0,
        }
    }

    fn output_frame_bytes(&self) -> u32 {
        match self.output.format {
            Some(f) => (f.width * f.height / 8).max(1),
            None => 0,
        }
    }

    fn complete_output(&mut self, index: u32) {
        self.clock_ns += FRAME_INTERVAL_NS;
        let mut flags = if self.frame_counter % GOP_LENGTH == 0 {
            BUFFER_FLAG_KEYFRAME
        } else {
            0
        };
        self.frame_counter += 1;
        if self.frame_limit == Some(self.frame_counter) {
            flags |= BUFFER_FLAG_LAST;
        }
        let completed = DequeuedBuffer {
            index,
            bytes_used: self.output_frame_bytes(),
            flags,
            timestamp_ns: self.clock_ns,
        };
        self.output.ready.push_back(completed);
    }
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl M2mDevice for LoopbackDevice {
    fn capabilities(&self) -> DeviceResult<DeviceCaps> {
        Ok(self.caps.clone())
    }

    fn set_format(&mut self, request: &SetFormat) -> DeviceResult<()> {
        if request.width == 0 || request.height == 0 {
            return Err(DeviceError::new(EINVAL, "zero geometry"));
        }
        let expected_planes = request.pixel_format.plane_count();
        if request.num_planes != expected_planes {
            return Err(DeviceError::new(
                EINVAL,
                format!(
                    "{} expects {} planes, got {}",
                    request.pixel_format, expected_planes, request.num_planes
                ),
            ));
        }
        self.queue_state(request.direction).format = Some(*request);
        Ok(())
    }

    fn request_buffers(&mut self, direction: Direction, count: u32) -> DeviceResult<u32> {
        if count > 0 && self.fail_request == Some(direction) {
            return Err(DeviceError::new(ENOMEM, "buffer memory exhausted"));
        }
        let state = self.queue_state(direction);
        state.allocated = count;
        state.ready.clear();
        if direction == Direction::Output {
            self.waiting_output.clear();
        }
        Ok(count)
    }

    fn stream_on(&mut self, direction: Direction) -> DeviceResult<()> {
        let state = self.queue_state(direction);
        if state.allocated == 0 {
            return Err(DeviceError::new(EINVAL, "no buffers allocated"));
        }
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self, direction: Direction) -> DeviceResult<()> {
        let state = self.queue_state(direction);
        state.streaming = false;
        state.ready.clear();
        if direction == Direction::Input {
            self.pending_frames = 0;
        } else {
            self.waiting_output.clear();
        }
        Ok(())
    }

    fn queue_buffer(&mut self, direction: Direction, index: u32) -> DeviceResult<()> {
        if self.fail_queue {
            return Err(DeviceError::new(EIO, "queue transfer failed"));
        }
        let state = self.queue_state(direction);
        if index >= state.allocated {
            return Err(DeviceError::new(EINVAL, format!("slot {} not allocated", index)));
        }
        if !state.streaming {
            return Err(DeviceError::new(EINVAL, "queue not streaming"));
        }
        match direction {
            Direction::Input => {
                // Input is consumed immediately and handed back, then paired
                // with a waiting output slot if one is available.
                self.clock_ns += FRAME_INTERVAL_NS;
                let consumed = DequeuedBuffer {
                    index,
                    bytes_used: self.input_frame_bytes(),
                    flags: 0,
                    timestamp_ns: self.clock_ns,
                };
                self.input.ready.push_back(consumed);
                match self.waiting_output.pop_front() {
                    Some(out_index) => self.complete_output(out_index),
                    None => self.pending_frames += 1,
                }
            }
            Direction::Output => {
                if self.pending_frames > 0 {
                    self.pending_frames -= 1;
                    self.complete_output(index);
                } else {
                    self.waiting_output.push_back(index);
                }
            }
        }
        Ok(())
    }

    fn dequeue_buffer(&mut self, direction: Direction) -> DeviceResult<Option<DequeuedBuffer>> {
        if self.fail_dequeue == Some(direction) {
            return Err(DeviceError::new(EIO, "dequeue transfer failed"));
        }
        let state = self.queue_state(direction);
        if !state.streaming {
            return Ok(None);
        }
        Ok(state.ready.pop_front())
    }
}
