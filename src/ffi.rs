//! C ABI exports the native core calls back into.
//!
//! Sessions are created on the Rust side with `CoreSession::new`, converted
//! to a raw handle with `session_into_handle`, and that handle is what the
//! core threads pass back to every export here. `CoreInterface_sessionClose`
//! consumes the handle.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Once;

use crate::audio::{AudioSpec, SampleFormat};
use crate::session::CoreSession;

static LOGGER_INIT: Once = Once::new();

/// Converts an owned session into the raw handle handed to the core.
pub fn session_into_handle(session: Box<CoreSession>) -> *mut CoreSession {
    Box::into_raw(session)
}

#[allow(non_snake_case)]
pub mod bindings {
    use super::*;

    #[inline(always)]
    unsafe fn cast_session<'a>(session: *mut CoreSession) -> &'a CoreSession {
        &*session
    }

    /// One-time logger bootstrap, called when the core library is loaded.
    #[no_mangle]
    pub extern "C" fn CoreInterface_startup() {
        LOGGER_INIT.call_once(|| {
            #[cfg(target_os = "android")]
            android_log::init("CoreInterface").unwrap();
            #[cfg(not(target_os = "android"))]
            let _ = env_logger::try_init();

            debug!("core interface loaded and logger initialized");
        });
    }

    /// Consumes the session handle. The core must have stopped calling any
    /// other export with it.
    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_sessionClose(session: *mut CoreSession) {
        if session.is_null() {
            return;
        }
        info!("destroying session {:p}", session);
        drop(Box::from_raw(session));
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_stateCallback(
        session: *mut CoreSession,
        param: c_int,
        value: c_int,
    ) {
        if session.is_null() {
            return;
        }
        cast_session(session).state().notify_raw(param, value);
    }

    /// Opens the audio session. `run_audio` is the core's blocking audio
    /// loop; it runs on the dedicated output thread. Returns the buffer
    /// size in frames, or -1 on failure.
    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_audioInit(
        session: *mut CoreSession,
        sample_rate: c_int,
        is_16_bit: c_int,
        is_stereo: c_int,
        desired_frames: c_int,
        run_audio: Option<unsafe extern "C" fn()>,
    ) -> c_int {
        if session.is_null() {
            return -1;
        }
        let spec = AudioSpec {
            sample_rate,
            format: if is_16_bit != 0 {
                SampleFormat::Pcm16
            } else {
                SampleFormat::Pcm8
            },
            channels: if is_stereo != 0 { 2 } else { 1 },
        };
        let result = cast_session(session).audio_init(
            spec,
            desired_frames.max(0) as usize,
            move || {
                if let Some(run_audio) = run_audio {
                    unsafe { run_audio() }
                }
            },
        );
        match result {
            Ok(frames) => frames as c_int,
            Err(err) => {
                error!("audio init failed: {}", err);
                -1
            }
        }
    }

    /// Pointer to the reusable 16-bit sample buffer, or null outside a
    /// 16-bit session. Valid until `audioQuit`.
    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_audioBuffer16(session: *mut CoreSession) -> *mut i16 {
        if session.is_null() {
            return ptr::null_mut();
        }
        let session = cast_session(session);
        let mut audio = session.audio().lock().unwrap();
        audio
            .buffer_i16()
            .map(|buf| buf.as_mut_ptr())
            .unwrap_or(ptr::null_mut())
    }

    /// 8-bit counterpart of `audioBuffer16`.
    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_audioBuffer8(session: *mut CoreSession) -> *mut u8 {
        if session.is_null() {
            return ptr::null_mut();
        }
        let session = cast_session(session);
        let mut audio = session.audio().lock().unwrap();
        audio
            .buffer_u8()
            .map(|buf| buf.as_mut_ptr())
            .unwrap_or(ptr::null_mut())
    }

    /// Buffer length in samples.
    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_audioBufferLen(session: *mut CoreSession) -> c_int {
        if session.is_null() {
            return 0;
        }
        cast_session(session).audio().lock().unwrap().buffer_len() as c_int
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_audioWriteShortBuffer(
        session: *mut CoreSession,
        samples: *const i16,
        len: c_int,
    ) {
        if session.is_null() || samples.is_null() || len <= 0 {
            return;
        }
        let samples = std::slice::from_raw_parts(samples, len as usize);
        cast_session(session).audio_write_i16(samples);
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_audioWriteByteBuffer(
        session: *mut CoreSession,
        samples: *const u8,
        len: c_int,
    ) {
        if session.is_null() || samples.is_null() || len <= 0 {
            return;
        }
        let samples = std::slice::from_raw_parts(samples, len as usize);
        cast_session(session).audio_write_u8(samples);
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_audioQuit(session: *mut CoreSession) {
        if session.is_null() {
            return;
        }
        cast_session(session).audio_quit();
    }

    /// Resolves the selected game to a playable ROM path. Returns an owned
    /// C string (release with `CoreInterface_freeString`) or null when the
    /// selection is invalid.
    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_getRomPath(session: *mut CoreSession) -> *mut c_char {
        if session.is_null() {
            return ptr::null_mut();
        }
        match cast_session(session).resolve_rom_path() {
            Ok(path) => into_c_string(&path.display().to_string()),
            Err(err) => {
                error!("ROM resolution failed: {}", err);
                ptr::null_mut()
            }
        }
    }

    /// Owned C string (release with `CoreInterface_freeString`).
    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_getDataDir(session: *mut CoreSession) -> *mut c_char {
        if session.is_null() {
            return ptr::null_mut();
        }
        into_c_string(&cast_session(session).data_dir().display().to_string())
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_freeString(s: *mut c_char) {
        if !s.is_null() {
            drop(CString::from_raw(s));
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_initEGL(
        session: *mut CoreSession,
        major_version: c_int,
        minor_version: c_int,
    ) -> c_int {
        if session.is_null() {
            return 0;
        }
        cast_session(session).init_egl(major_version, minor_version) as c_int
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_flipEGL(session: *mut CoreSession) {
        if session.is_null() {
            return;
        }
        cast_session(session).flip_egl();
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_getAutoFrameSkip(session: *mut CoreSession) -> c_int {
        if session.is_null() {
            return 0;
        }
        cast_session(session).auto_frame_skip() as c_int
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_getMaxFrameSkip(session: *mut CoreSession) -> c_int {
        if session.is_null() {
            return 0;
        }
        cast_session(session).max_frame_skip()
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_getScreenStretch(session: *mut CoreSession) -> c_int {
        if session.is_null() {
            return 0;
        }
        cast_session(session).screen_stretch() as c_int
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_getScreenPosition(session: *mut CoreSession) -> c_int {
        if session.is_null() {
            return 0;
        }
        cast_session(session).screen_position()
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_useRGBA8888(session: *mut CoreSession) -> c_int {
        if session.is_null() {
            return 0;
        }
        cast_session(session).use_rgba8888() as c_int
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_getHardwareType(session: *mut CoreSession) -> c_int {
        if session.is_null() {
            return -1;
        }
        cast_session(session).hardware_type()
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_vibrate(session: *mut CoreSession, active: c_int) {
        if session.is_null() {
            return;
        }
        cast_session(session).vibrate(active != 0);
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_setActivityTitle(
        session: *mut CoreSession,
        title: *const c_char,
    ) {
        if let Some(title) = to_str(session, title) {
            cast_session(session).set_title(&title);
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn CoreInterface_showToast(
        session: *mut CoreSession,
        message: *const c_char,
    ) {
        if let Some(message) = to_str(session, message) {
            cast_session(session).show_toast(&message);
        }
    }

    fn into_c_string(s: &str) -> *mut c_char {
        match CString::new(s) {
            Ok(s) => s.into_raw(),
            Err(_) => {
                warn!("string with interior NUL cannot cross the C boundary");
                ptr::null_mut()
            }
        }
    }

    unsafe fn to_str(session: *mut CoreSession, s: *const c_char) -> Option<String> {
        if session.is_null() || s.is_null() {
            return None;
        }
        match CStr::from_ptr(s).to_str() {
            Ok(s) => Some(s.to_string()),
            Err(_) => {
                warn!("ignoring invalid UTF-8 string from the core");
                None
            }
        }
    }
}
