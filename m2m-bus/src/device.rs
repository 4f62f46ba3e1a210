//! Device boundary for memory-to-memory (M2M) codec hardware.
//!
//! An M2M device consumes buffers on an input queue and produces buffers on
//! an independent output queue, both owned by the same driver session. The
//! session core talks to the device exclusively through [`M2mDevice`] with
//! one tagged request type per operation; opening the device by name is the
//! implementation's concern and closing happens on drop.

/// Identifies one of the two independent buffer queues of an M2M device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Data fed to the codec.
    Input,
    /// Data produced by the codec.
    Output,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Failure reported by the device: numeric code plus driver diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for DeviceError {}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Capability summary queried once when a session opens the device.
#[derive(Debug, Clone, Default)]
pub struct DeviceCaps {
    pub driver: String,
    /// Whether the device supports multiplanar M2M streaming.
    pub m2m_mplane: bool,
}

/// Pixel or compressed-stream format identifier at the device boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, two planes. The only raw input layout the device accepts.
    Nv12,
    H264,
    Hevc,
    Vp8,
    Vp9,
}

impl PixelFormat {
    pub fn plane_count(self) -> u32 {
        match self {
            PixelFormat::Nv12 => 2,
            _ => 1,
        }
    }

    pub fn is_compressed(self) -> bool {
        !matches!(self, PixelFormat::Nv12)
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PixelFormat::Nv12 => "nv12",
            PixelFormat::H264 => "h264",
            PixelFormat::Hevc => "hevc",
            PixelFormat::Vp8 => "vp8",
            PixelFormat::Vp9 => "vp9",
        };
        write!(f, "{}", name)
    }
}

/// Set-format request for one queue direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetFormat {
    pub direction: Direction,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub num_planes: u32,
}

/// Completed buffer handed back by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    pub flags: u32,
    /// Monotonic capture timestamp in nanoseconds.
    pub timestamp_ns: i64,
}

/// Flag bit on a dequeued output buffer carrying a keyframe.
pub const BUFFER_FLAG_KEYFRAME: u32 = 1 << 0;
/// Flag bit marking the last buffer the device will produce.
pub const BUFFER_FLAG_LAST: u32 = 1 << 1;

/// Streaming M2M device as seen by the session core.
///
/// `dequeue_buffer` is non-blocking: `Ok(None)` means no buffer is ready yet
/// and the caller should retry later. Transient conditions (would-block,
/// interrupted call) are reported as `Ok(None)`, never as an error.
pub trait M2mDevice: Send {
    fn capabilities(&self) -> DeviceResult<DeviceCaps>;

    fn set_format(&mut self, request: &SetFormat) -> DeviceResult<()>;

    /// Request `count` device-backed buffers for `direction`; returns the
    /// count actually granted. A count of zero frees the pool.
    fn request_buffers(&mut self, direction: Direction, count: u32) -> DeviceResult<u32>;

    fn stream_on(&mut self, direction: Direction) -> DeviceResult<()>;

    fn stream_off(&mut self, direction: Direction) -> DeviceResult<()>;

    fn queue_buffer(&mut self, direction: Direction, index: u32) -> DeviceResult<()>;

    fn dequeue_buffer(&mut self, direction: Direction) -> DeviceResult<Option<DequeuedBuffer>>;
}
