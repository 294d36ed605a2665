//! Parameter ids and run-states reported by the core's state callback.
//!
//! The integer values are part of the core's API and must not change.

use num::FromPrimitive;

#[derive(Debug, Primitive, Copy, Clone, PartialEq, Eq)]
pub enum CoreParam {
    EmuState = 1,
    VideoMode = 2,
    SavestateSlot = 3,
    SpeedFactor = 4,
    SpeedLimiter = 5,
    VideoSize = 6,
    AudioVolume = 7,
    AudioMute = 8,
    InputGameshark = 9,
    StateLoadComplete = 10,
    StateSaveComplete = 11,
}

impl CoreParam {
    /// Converts a raw callback value coming over the FFI boundary.
    pub fn from_raw(raw: i32) -> Option<CoreParam> {
        CoreParam::from_i32(raw)
    }
}

#[derive(Debug, Primitive, Copy, Clone, PartialEq, Eq)]
pub enum EmuState {
    Unknown = 0,
    Stopped = 1,
    Running = 2,
    Paused = 3,
}

impl EmuState {
    pub fn from_raw(raw: i32) -> Option<EmuState> {
        EmuState::from_i32(raw)
    }
}
