#[macro_use]
extern crate log;

#[macro_use]
extern crate enum_primitive_derive;

use std::error::Error;
use std::fmt;
use std::io;

pub mod audio;
pub mod config;
pub mod ffi;
pub mod params;
pub mod rom;
pub mod session;
pub mod state;

pub use audio::{AudioDevice, AudioRelay, AudioSpec, SampleFormat};
pub use params::{CoreParam, EmuState};
pub use session::{AppData, CoreSession, Frontend, Preferences, Vibrator};
pub use state::StateGate;

#[derive(Debug)]
pub enum CoreError {
    Io(io::Error),
    RomInvalid(String),
    Audio(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Io(err) => write!(f, "i/o error: {}", err),
            CoreError::RomInvalid(msg) => write!(f, "invalid ROM: {}", msg),
            CoreError::Audio(msg) => write!(f, "audio error: {}", msg),
        }
    }
}

impl Error for CoreError {}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> CoreError {
        CoreError::Io(err)
    }
}

impl From<zip::result::ZipError> for CoreError {
    fn from(err: zip::result::ZipError) -> CoreError {
        // the only zip consumer is ROM extraction
        CoreError::RomInvalid(format!("zip error: {:?}", err))
    }
}
