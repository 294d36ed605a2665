//! Per-session context consolidating everything the core interop needs.
//!
//! One `CoreSession` is built for each run of the core and handed to every
//! collaborator explicitly; there is no static registry. Construction
//! snapshots the user preferences and rewrites the config files; the
//! session is then safe to share with the core's threads through the FFI
//! boundary.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::audio::{AudioDevice, AudioRelay, AudioSpec};
use crate::config;
use crate::rom;
use crate::state::StateGate;
use crate::{CoreError, CoreResult};

/// Haptic feedback pattern in milliseconds (delay, on, off), repeated
/// until cancelled.
pub const VIBRATE_PATTERN: [u64; 3] = [0, 500, 0];

/// GUI-side collaborator: surface and notification plumbing. Marshaling
/// onto a UI thread, where required, is the implementation's concern.
pub trait Frontend: Send {
    fn init_egl(&mut self, major_version: i32, minor_version: i32) -> bool;
    fn flip_egl(&mut self);
    fn set_title(&mut self, title: &str);
    fn show_toast(&mut self, message: &str);
    /// Asks the hosting shell to end the current game session (back to the
    /// menu, not process exit).
    fn finish(&mut self);
}

pub trait Vibrator: Send {
    fn vibrate(&mut self, pattern: &[u64]);
    fn cancel(&mut self);
}

pub type AudioDeviceFactory = Box<dyn Fn(&AudioSpec) -> Box<dyn AudioDevice> + Send + Sync>;

/// Immutable snapshot of the user's choices, read once per session.
#[derive(Debug, Clone)]
pub struct Preferences {
    pub selected_game: Option<PathBuf>,
    pub frame_limiter: bool,
    pub r4300_emulator: String,
    pub slot_save_dir: PathBuf,
    pub video_plugin: PathBuf,
    pub audio_plugin: PathBuf,
    pub input_plugin: PathBuf,
    pub rsp_plugin: PathBuf,
    pub audio_swap_channels: bool,
    pub audio_resample_alg: String,
    pub rice_auto_frameskip: bool,
    pub rice_fast_texture_loading: bool,
    pub rice_fast_texture_crc: bool,
    pub rice_hires_textures: bool,
    pub rice_force_texture_filter: bool,
    pub rice_mipmapping_alg: String,
    pub rice_texture_enhancement: String,
    pub n64_fog: bool,
    pub n64_alpha_test: bool,
    pub n64_screen_clear: bool,
    pub n64_depth_test: bool,
    pub n64_auto_frameskip: bool,
    pub n64_max_frameskip: i32,
    pub screen_stretch: bool,
    pub screen_position: i32,
    pub rgba8888: bool,
    /// Negative means "use the auto-detected hardware type".
    pub video_hardware_type: i32,
    pub plugged: [bool; 4],
}

impl Default for Preferences {
    fn default() -> Preferences {
        Preferences {
            selected_game: None,
            frame_limiter: true,
            r4300_emulator: "2".to_string(),
            slot_save_dir: PathBuf::new(),
            video_plugin: PathBuf::new(),
            audio_plugin: PathBuf::new(),
            input_plugin: PathBuf::new(),
            rsp_plugin: PathBuf::new(),
            audio_swap_channels: false,
            audio_resample_alg: "trivial".to_string(),
            rice_auto_frameskip: false,
            rice_fast_texture_loading: false,
            rice_fast_texture_crc: true,
            rice_hires_textures: false,
            rice_force_texture_filter: false,
            rice_mipmapping_alg: "0".to_string(),
            rice_texture_enhancement: "0".to_string(),
            n64_fog: false,
            n64_alpha_test: true,
            n64_screen_clear: true,
            n64_depth_test: true,
            n64_auto_frameskip: false,
            n64_max_frameskip: 0,
            screen_stretch: false,
            screen_position: 0,
            rgba8888: false,
            video_hardware_type: -1,
            plugged: [true, false, false, false],
        }
    }
}

/// Installation paths and detected hardware facts.
#[derive(Debug, Clone)]
pub struct AppData {
    pub data_dir: PathBuf,
    pub libs_dir: PathBuf,
    pub mupen64plus_cfg: PathBuf,
    pub gles2n64_conf: PathBuf,
    pub hardware_type: i32,
}

impl AppData {
    pub fn new(data_dir: &Path, libs_dir: &Path, hardware_type: i32) -> AppData {
        AppData {
            mupen64plus_cfg: data_dir.join("mupen64plus.cfg"),
            gles2n64_conf: data_dir.join("gles2n64.conf"),
            data_dir: data_dir.to_path_buf(),
            libs_dir: libs_dir.to_path_buf(),
            hardware_type,
        }
    }
}

/// Last-error slot surfaced to the user after a failed launch.
#[derive(Default)]
pub struct Diagnostics {
    last_error: Mutex<Option<(String, String)>>,
}

impl Diagnostics {
    pub fn put_last_error(&self, tag: &str, code: &str) {
        info!("diagnostic recorded: {}/{}", tag, code);
        *self.last_error.lock().unwrap() = Some((tag.to_string(), code.to_string()));
    }

    pub fn last_error(&self) -> Option<(String, String)> {
        self.last_error.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct StartupMode {
    cheat_options: Option<String>,
    is_restarting: bool,
}

pub struct CoreSession {
    prefs: Preferences,
    app_data: AppData,
    frontend: Mutex<Box<dyn Frontend>>,
    vibrator: Option<Mutex<Box<dyn Vibrator>>>,
    audio_device_factory: AudioDeviceFactory,
    audio: Mutex<AudioRelay>,
    state: StateGate,
    diagnostics: Diagnostics,
    startup: Mutex<StartupMode>,
}

impl CoreSession {
    /// Builds the session and rewrites both config files. A config write
    /// failure aborts construction since the core cannot start without them.
    pub fn new(
        prefs: Preferences,
        app_data: AppData,
        frontend: Box<dyn Frontend>,
        vibrator: Option<Box<dyn Vibrator>>,
        audio_device_factory: AudioDeviceFactory,
    ) -> CoreResult<CoreSession> {
        config::sync_config_files(&prefs, &app_data)?;
        Ok(CoreSession {
            prefs,
            app_data,
            frontend: Mutex::new(frontend),
            vibrator: vibrator.map(Mutex::new),
            audio_device_factory,
            audio: Mutex::new(AudioRelay::new()),
            state: StateGate::new(),
            diagnostics: Diagnostics::default(),
            startup: Mutex::new(StartupMode::default()),
        })
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub fn app_data(&self) -> &AppData {
        &self.app_data
    }

    pub fn state(&self) -> &StateGate {
        &self.state
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Cheats are only honored on a restart.
    pub fn set_startup_mode(&self, cheat_args: Option<&str>, is_restarting: bool) {
        let mut startup = self.startup.lock().unwrap();
        startup.cheat_options = match cheat_args {
            Some(args) if is_restarting => Some(format!("--cheats {}", args)),
            _ => None,
        };
        startup.is_restarting = is_restarting;
    }

    pub fn is_restarting(&self) -> bool {
        self.startup.lock().unwrap().is_restarting
    }

    /// Extra CLI-style flags for the core's front-end, space-separated in
    /// encounter order; empty when nothing applies.
    pub fn extra_args(&self) -> String {
        let mut args = String::new();
        if !self.prefs.frame_limiter {
            args = append_arg(args, "--nospeedlimit");
        }
        if let Some(cheats) = &self.startup.lock().unwrap().cheat_options {
            args = append_arg(args, cheats);
        }
        args
    }

    /// Resolves the selected game to a playable ROM path, extracting
    /// zipped selections into `<data_dir>/tmp`. Any failure ends the
    /// session; a zip failure additionally leaves a diagnostic for the UI.
    pub fn resolve_rom_path(&self) -> CoreResult<PathBuf> {
        let selected = match &self.prefs.selected_game {
            Some(path) if path.exists() => path,
            Some(path) => {
                return self.end_session(CoreError::RomInvalid(format!(
                    "selected game does not exist: '{}'",
                    path.display()
                )))
            }
            None => {
                return self.end_session(CoreError::RomInvalid("no game selected".to_string()))
            }
        };

        if !rom::has_zip_extension(selected) {
            return Ok(selected.clone());
        }

        let scratch = self.app_data.data_dir.join("tmp");
        match rom::unzip_first_rom(selected, &scratch) {
            Ok(path) => Ok(path),
            Err(err) => {
                info!("cannot play zipped ROM '{}'", selected.display());
                self.diagnostics.put_last_error("OPEN_ROM", "fail_crash");
                self.end_session(err)
            }
        }
    }

    /// Every resolution failure is terminal for the session, not the
    /// process: the shell is asked to end the game and return to its menu.
    fn end_session(&self, err: CoreError) -> CoreResult<PathBuf> {
        self.frontend.lock().unwrap().finish();
        Err(err)
    }

    // Renderer-preference getters the core polls during startup.

    pub fn auto_frame_skip(&self) -> bool {
        self.prefs.n64_auto_frameskip
    }

    pub fn max_frame_skip(&self) -> i32 {
        self.prefs.n64_max_frameskip
    }

    pub fn screen_stretch(&self) -> bool {
        self.prefs.screen_stretch
    }

    pub fn screen_position(&self) -> i32 {
        self.prefs.screen_position
    }

    pub fn use_rgba8888(&self) -> bool {
        self.prefs.rgba8888
    }

    pub fn hardware_type(&self) -> i32 {
        if self.prefs.video_hardware_type < 0 {
            self.app_data.hardware_type
        } else {
            self.prefs.video_hardware_type
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.app_data.data_dir
    }

    // Audio session plumbing; see `AudioRelay`.

    pub fn audio_init<F>(
        &self,
        spec: AudioSpec,
        desired_frames: usize,
        core_entry: F,
    ) -> CoreResult<usize>
    where
        F: FnOnce() + Send + 'static,
    {
        let device = (self.audio_device_factory)(&spec);
        self.audio
            .lock()
            .unwrap()
            .init(device, spec, desired_frames, core_entry)
    }

    pub fn audio_write_i16(&self, samples: &[i16]) {
        self.audio.lock().unwrap().write_i16(samples);
    }

    pub fn audio_write_u8(&self, samples: &[u8]) {
        self.audio.lock().unwrap().write_u8(samples);
    }

    /// The wait happens with the relay unlocked: the core's in-flight
    /// `audio_write_*` needs the relay to finish, and its loop only exits
    /// once it does.
    pub fn audio_quit(&self) {
        let worker = self.audio.lock().unwrap().take_worker();
        if let Some(worker) = worker {
            worker.wait();
        }
        self.audio.lock().unwrap().release();
    }

    pub fn audio(&self) -> &Mutex<AudioRelay> {
        &self.audio
    }

    pub fn vibrate(&self, active: bool) {
        if let Some(vibrator) = &self.vibrator {
            let mut vibrator = vibrator.lock().unwrap();
            if active {
                vibrator.vibrate(&VIBRATE_PATTERN);
            } else {
                vibrator.cancel();
            }
        }
    }

    // Frontend relay.

    pub fn init_egl(&self, major_version: i32, minor_version: i32) -> bool {
        self.frontend
            .lock()
            .unwrap()
            .init_egl(major_version, minor_version)
    }

    pub fn flip_egl(&self) {
        self.frontend.lock().unwrap().flip_egl();
    }

    pub fn set_title(&self, title: &str) {
        self.frontend.lock().unwrap().set_title(title);
    }

    pub fn show_toast(&self, message: &str) {
        self.frontend.lock().unwrap().show_toast(message);
    }
}

fn append_arg(prev: String, arg: &str) -> String {
    if prev.is_empty() {
        arg.to_string()
    } else {
        format!("{} {}", prev, arg)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fs;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use zip::write::FileOptions;
    use zip::ZipWriter;

    #[derive(Default)]
    struct RecordingFrontend {
        titles: Vec<String>,
        toasts: Vec<String>,
        flips: usize,
        finishes: Arc<Mutex<usize>>,
    }

    impl Frontend for RecordingFrontend {
        fn init_egl(&mut self, major_version: i32, _minor_version: i32) -> bool {
            major_version >= 2
        }

        fn flip_egl(&mut self) {
            self.flips += 1;
        }

        fn set_title(&mut self, title: &str) {
            self.titles.push(title.to_string());
        }

        fn show_toast(&mut self, message: &str) {
            self.toasts.push(message.to_string());
        }

        fn finish(&mut self) {
            *self.finishes.lock().unwrap() += 1;
        }
    }

    #[derive(Default)]
    struct RecordingVibrator {
        patterns: Arc<Mutex<Vec<Vec<u64>>>>,
        cancels: Arc<Mutex<usize>>,
    }

    impl Vibrator for RecordingVibrator {
        fn vibrate(&mut self, pattern: &[u64]) {
            self.patterns.lock().unwrap().push(pattern.to_vec());
        }

        fn cancel(&mut self) {
            *self.cancels.lock().unwrap() += 1;
        }
    }

    fn null_audio_factory() -> AudioDeviceFactory {
        struct NullDevice;
        impl AudioDevice for NullDevice {
            fn min_buffer_size(&self, _spec: &AudioSpec) -> usize {
                0
            }
            fn start(&mut self) {}
            fn write_i16(&mut self, samples: &[i16]) -> i32 {
                samples.len() as i32
            }
            fn write_u8(&mut self, samples: &[u8]) -> i32 {
                samples.len() as i32
            }
            fn stop(&mut self) {}
        }
        Box::new(|_spec| Box::new(NullDevice))
    }

    fn session_in(dir: &Path, prefs: Preferences) -> CoreSession {
        let app_data = AppData::new(dir, Path::new("/data/libs"), 3);
        CoreSession::new(
            prefs,
            app_data,
            Box::new(RecordingFrontend::default()),
            None,
            null_audio_factory(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_writes_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), Preferences::default());
        assert!(session.app_data().mupen64plus_cfg.exists());
        assert!(session.app_data().gles2n64_conf.exists());
    }

    #[test]
    fn test_new_fails_on_unwritable_config_dir() {
        let app_data = AppData::new(
            Path::new("/nonexistent-session-dir"),
            Path::new("/data/libs"),
            0,
        );
        let result = CoreSession::new(
            Preferences::default(),
            app_data,
            Box::new(RecordingFrontend::default()),
            None,
            null_audio_factory(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_extra_args_empty_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), Preferences::default());
        assert_eq!(session.extra_args(), "");
    }

    #[test]
    fn test_extra_args_single_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefs = Preferences::default();
        prefs.frame_limiter = false;
        let session = session_in(dir.path(), prefs);
        assert_eq!(session.extra_args(), "--nospeedlimit");
    }

    #[test]
    fn test_extra_args_joined_with_single_space() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefs = Preferences::default();
        prefs.frame_limiter = false;
        let session = session_in(dir.path(), prefs);
        session.set_startup_mode(Some("1,2"), true);
        assert_eq!(session.extra_args(), "--nospeedlimit --cheats 1,2");
        assert!(session.is_restarting());
    }

    #[test]
    fn test_cheats_ignored_unless_restarting() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), Preferences::default());
        session.set_startup_mode(Some("1,2"), false);
        assert_eq!(session.extra_args(), "");
        assert!(!session.is_restarting());
    }

    #[test]
    fn test_resolve_rom_path_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let rom_path = dir.path().join("game.z64");
        fs::write(&rom_path, b"rom").unwrap();

        let mut prefs = Preferences::default();
        prefs.selected_game = Some(rom_path.clone());
        let session = session_in(dir.path(), prefs);
        assert_eq!(session.resolve_rom_path().unwrap(), rom_path);
    }

    #[test]
    fn test_resolve_rom_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefs = Preferences::default();
        prefs.selected_game = Some(dir.path().join("gone.z64"));
        let session = session_in(dir.path(), prefs);
        match session.resolve_rom_path() {
            Err(CoreError::RomInvalid(_)) => {}
            other => panic!("expected RomInvalid, got {:?}", other),
        }
        // a missing file is not the zip failure path; no diagnostic
        assert!(session.diagnostics().last_error().is_none());
    }

    #[test]
    fn test_missing_selection_finishes_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefs = Preferences::default();
        prefs.selected_game = Some(dir.path().join("gone.z64"));

        let frontend = RecordingFrontend::default();
        let finishes = frontend.finishes.clone();
        let session = CoreSession::new(
            prefs,
            AppData::new(dir.path(), Path::new("/data/libs"), 0),
            Box::new(frontend),
            None,
            null_audio_factory(),
        )
        .unwrap();

        assert!(session.resolve_rom_path().is_err());
        // the shell was asked to end the session; the diagnostic stays
        // reserved for the zip failure path
        assert_eq!(*finishes.lock().unwrap(), 1);
        assert!(session.diagnostics().last_error().is_none());
    }

    #[test]
    fn test_no_selection_finishes_session() {
        let dir = tempfile::tempdir().unwrap();
        let frontend = RecordingFrontend::default();
        let finishes = frontend.finishes.clone();
        let session = CoreSession::new(
            Preferences::default(),
            AppData::new(dir.path(), Path::new("/data/libs"), 0),
            Box::new(frontend),
            None,
            null_audio_factory(),
        )
        .unwrap();

        assert!(session.resolve_rom_path().is_err());
        assert_eq!(*finishes.lock().unwrap(), 1);
    }

    #[test]
    fn test_resolve_rom_path_extracts_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("game.zip");
        let file = fs::File::create(&archive).unwrap();
        let mut writer = ZipWriter::new(file);
        writer
            .start_file("inner.v64", FileOptions::default())
            .unwrap();
        writer.write_all(b"zipped rom").unwrap();
        writer.finish().unwrap();

        let mut prefs = Preferences::default();
        prefs.selected_game = Some(archive);
        let session = session_in(dir.path(), prefs);

        let resolved = session.resolve_rom_path().unwrap();
        assert_eq!(resolved, dir.path().join("tmp").join("inner.v64"));
        assert_eq!(fs::read(&resolved).unwrap(), b"zipped rom");
    }

    #[test]
    fn test_romless_zip_records_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("empty.zip");
        let file = fs::File::create(&archive).unwrap();
        let mut writer = ZipWriter::new(file);
        writer
            .start_file("readme.txt", FileOptions::default())
            .unwrap();
        writer.write_all(b"no rom here").unwrap();
        writer.finish().unwrap();

        let mut prefs = Preferences::default();
        prefs.selected_game = Some(archive);

        let frontend = RecordingFrontend::default();
        let finishes = frontend.finishes.clone();
        let session = CoreSession::new(
            prefs,
            AppData::new(dir.path(), Path::new("/data/libs"), 0),
            Box::new(frontend),
            None,
            null_audio_factory(),
        )
        .unwrap();

        match session.resolve_rom_path() {
            Err(CoreError::RomInvalid(_)) => {}
            other => panic!("expected RomInvalid, got {:?}", other),
        }
        assert_eq!(
            session.diagnostics().last_error(),
            Some(("OPEN_ROM".to_string(), "fail_crash".to_string()))
        );
        // the shell was asked to end the session
        assert_eq!(*finishes.lock().unwrap(), 1);
    }

    #[test]
    fn test_hardware_type_override() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), Preferences::default());
        // default preference is negative -> auto-detected value wins
        assert_eq!(session.hardware_type(), 3);

        let mut prefs = Preferences::default();
        prefs.video_hardware_type = 7;
        let session = session_in(dir.path(), prefs);
        assert_eq!(session.hardware_type(), 7);
    }

    #[test]
    fn test_vibrate_uses_pattern_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let vibrator = RecordingVibrator::default();
        let patterns = vibrator.patterns.clone();
        let cancels = vibrator.cancels.clone();

        let app_data = AppData::new(dir.path(), Path::new("/data/libs"), 0);
        let session = CoreSession::new(
            Preferences::default(),
            app_data,
            Box::new(RecordingFrontend::default()),
            Some(Box::new(vibrator)),
            null_audio_factory(),
        )
        .unwrap();

        session.vibrate(true);
        session.vibrate(false);
        assert_eq!(*patterns.lock().unwrap(), vec![vec![0, 500, 0]]);
        assert_eq!(*cancels.lock().unwrap(), 1);
    }

    #[test]
    fn test_vibrate_without_vibrator_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), Preferences::default());
        session.vibrate(true);
        session.vibrate(false);
    }

    #[test]
    fn test_audio_session_through_facade() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), Preferences::default());

        let frames = session
            .audio_init(
                AudioSpec {
                    sample_rate: 44100,
                    format: crate::audio::SampleFormat::Pcm16,
                    channels: 2,
                },
                1024,
                || {},
            )
            .unwrap();
        assert_eq!(frames, 1024);
        session.audio_write_i16(&[0; 64]);
        session.audio_quit();
        assert!(!session.audio().lock().unwrap().is_active());
    }

    #[test]
    fn test_audio_quit_unblocks_inflight_writer() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(session_in(dir.path(), Preferences::default()));

        // core loop streaming through the session facade until told to stop
        let stop = Arc::new(AtomicBool::new(false));
        let writer_session = session.clone();
        let writer_stop = stop.clone();
        session
            .audio_init(
                AudioSpec {
                    sample_rate: 44100,
                    format: crate::audio::SampleFormat::Pcm16,
                    channels: 2,
                },
                64,
                move || {
                    while !writer_stop.load(Ordering::SeqCst) {
                        writer_session.audio_write_i16(&[0; 32]);
                    }
                },
            )
            .unwrap();

        let stopper = thread::spawn({
            let stop = stop.clone();
            move || {
                thread::sleep(Duration::from_millis(200));
                stop.store(true, Ordering::SeqCst);
            }
        });

        // quit must not starve the writer of the relay while it waits,
        // or it would sit out its whole timeout and detach the thread
        let begun = Instant::now();
        session.audio_quit();
        assert!(begun.elapsed() < Duration::from_secs(2));
        assert!(!session.audio().lock().unwrap().is_active());
        stopper.join().unwrap();
    }

    #[test]
    fn test_frontend_relay() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(dir.path(), Preferences::default());
        assert!(session.init_egl(2, 0));
        assert!(!session.init_egl(1, 4));
        session.flip_egl();
        session.set_title("Super Mario 64");
        session.show_toast("Game saved");
    }
}
