//! Wire-level frame record broadcast through frame segments.
//!
//! Producer and consumers map the same ring slots, so this layout is the
//! cross-process contract: `#[repr(C)]`, explicit field order, sizes
//! pinned below. Enum-valued fields are carried as raw `u8` and decoded
//! through accessors; a foreign mapping is never trusted to hold a valid
//! discriminant.

use crate::consts::MAX_DISPLAYED_INSTANCES;
use crate::fixed_vec::FixedCapVec;
use static_assertions::const_assert_eq;

/// Kind of a displayed frame instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// No frame type recorded.
    NotSet = 0,
    /// Frame type unknown to the tracing provider.
    Unspecified = 1,
    /// Frame produced by the application itself.
    Application = 2,
    /// Previous frame repeated by the presentation stack.
    Repeated = 3,
    /// Frame generated by Intel XeSS frame generation.
    IntelXefg = 50,
    /// Frame generated by AMD Fluid Motion Frames.
    AmdAfmf = 100,
}

impl FrameType {
    /// Decodes a raw wire value. Returns `None` for unknown values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotSet),
            1 => Some(Self::Unspecified),
            2 => Some(Self::Application),
            3 => Some(Self::Repeated),
            50 => Some(Self::IntelXefg),
            100 => Some(Self::AmdAfmf),
            _ => None,
        }
    }
}

/// Final outcome of a present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PresentResult {
    /// Outcome not yet determined.
    Unknown = 0,
    /// The present reached the display.
    Presented = 1,
    /// The present was discarded before display.
    Discarded = 2,
}

impl PresentResult {
    /// Decodes a raw wire value. Returns `None` for unknown values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Presented),
            2 => Some(Self::Discarded),
            _ => None,
        }
    }
}

/// Source device of an application-sampled input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum InputDeviceType {
    /// No input sampled.
    #[default]
    None = 0,
    /// Device type not identified.
    Unknown = 1,
    /// Mouse input.
    Mouse = 2,
    /// Keyboard input.
    Keyboard = 3,
}

impl InputDeviceType {
    /// Decodes a raw wire value. Returns `None` for unknown values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Unknown),
            2 => Some(Self::Mouse),
            3 => Some(Self::Keyboard),
            _ => None,
        }
    }
}

/// One `(frame type, screen time)` entry of a frame's displayed history.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayedInstance {
    /// Raw `FrameType` discriminant.
    pub frame_type: u8,
    /// QPC timestamp at which this instance reached the display.
    pub screen_time: u64,
}

impl DisplayedInstance {
    /// Creates an instance from a typed frame type.
    pub fn new(frame_type: FrameType, screen_time: u64) -> Self {
        Self {
            frame_type: frame_type as u8,
            screen_time,
        }
    }

    /// Typed frame type, `None` when the raw value is unknown.
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    /// True when this instance is an application frame.
    pub fn is_application(&self) -> bool {
        self.frame_type == FrameType::Application as u8
    }
}

const_assert_eq!(std::mem::size_of::<DisplayedInstance>(), 16);

/// Application-propagated input sample: timestamp plus device type.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSample {
    /// QPC timestamp of the sampled input.
    pub time: u64,
    /// Raw `InputDeviceType` discriminant.
    pub device: u8,
}

const_assert_eq!(std::mem::size_of::<InputSample>(), 16);

/// Per-present record published on the frame ring.
///
/// Field order, sizes and padding are part of the wire contract; both
/// sides assert the total size at compile time.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameRecord {
    /// QPC time the present call started.
    pub present_start_time: u64,
    /// QPC time GPU work for this present completed.
    pub ready_time: u64,
    /// Ticks spent inside the present API call.
    pub time_in_present: u64,
    /// QPC time GPU work started.
    pub gpu_start_time: u64,
    /// Ticks of GPU work attributed to this frame.
    pub gpu_duration: u64,
    /// Ticks of GPU video-engine work attributed to this frame.
    pub gpu_video_duration: u64,

    /// Application present start propagated through frame generation.
    pub app_propagated_present_start_time: u64,
    /// Application time-in-present propagated through frame generation.
    pub app_propagated_time_in_present: u64,
    /// Application GPU start propagated through frame generation.
    pub app_propagated_gpu_start_time: u64,
    /// Application ready time propagated through frame generation.
    pub app_propagated_ready_time: u64,
    /// Application GPU duration propagated through frame generation.
    pub app_propagated_gpu_duration: u64,
    /// Application GPU video duration propagated through frame generation.
    pub app_propagated_gpu_video_duration: u64,

    /// Instrumented simulation start time.
    pub app_sim_start_time: u64,
    /// Instrumented sleep start time.
    pub app_sleep_start_time: u64,
    /// Instrumented sleep end time.
    pub app_sleep_end_time: u64,
    /// Instrumented render submit start time.
    pub app_render_submit_start_time: u64,
    /// Instrumented render submit end time.
    pub app_render_submit_end_time: u64,
    /// Instrumented present start time.
    pub app_present_start_time: u64,
    /// Instrumented present end time.
    pub app_present_end_time: u64,
    /// Instrumented input sample (time + device type).
    pub app_input_sample: InputSample,

    /// Most recent input timestamp across all devices.
    pub input_time: u64,
    /// Most recent mouse click timestamp.
    pub mouse_click_time: u64,

    /// Displayed instance history of this present.
    pub displayed: FixedCapVec<DisplayedInstance, MAX_DISPLAYED_INSTANCES>,

    /// PC-latency simulation start time.
    pub pcl_sim_start_time: u64,
    /// PC-latency input ping time.
    pub pcl_input_ping_time: u64,
    /// Ticks the flip was delayed by frame pacing.
    pub flip_delay: u64,
    /// Pacing token associated with the flip.
    pub flip_token: u32,
    /// Raw `PresentResult` discriminant.
    pub final_state: u8,

    /// Producing process id.
    pub process_id: u32,
    /// Producing thread id.
    pub thread_id: u32,
    /// Swap-chain identity of the presentation queue.
    pub swap_chain_address: u64,
    /// Monotonic frame id assigned by the tracing provider.
    pub frame_id: u32,
    /// Application-reported frame id.
    pub app_frame_id: u32,
}

const_assert_eq!(std::mem::size_of::<FrameRecord>(), 408);
const_assert_eq!(std::mem::align_of::<FrameRecord>(), 8);

impl FrameRecord {
    /// Typed present outcome; `None` when the raw value is unknown.
    pub fn final_state(&self) -> Option<PresentResult> {
        PresentResult::from_u8(self.final_state)
    }

    /// Stores a typed present outcome.
    pub fn set_final_state(&mut self, state: PresentResult) {
        self.final_state = state as u8;
    }

    /// True when the present reached the display.
    pub fn is_presented(&self) -> bool {
        self.final_state == PresentResult::Presented as u8
    }
}
