//! Generation of the two config files the core reads at startup.
//!
//! `mupen64plus.cfg` is INI-style with named sections; `gles2n64.conf` is a
//! sectionless key/value file. The two files deliberately use different
//! boolean spellings; each one matches what its parser in the core
//! expects, so they are not unified here.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::session::{AppData, Preferences};
use crate::CoreResult;

struct Section {
    name: Option<String>,
    entries: Vec<(String, String)>,
}

/// Ordered key/value store with optional named sections, written as
/// `[Section]` headers followed by `key = value` lines.
#[derive(Default)]
pub struct ConfigFile {
    sections: Vec<Section>,
}

impl ConfigFile {
    pub fn new() -> ConfigFile {
        ConfigFile::default()
    }

    fn section_mut(&mut self, name: Option<&str>) -> &mut Section {
        if let Some(index) = self
            .sections
            .iter()
            .position(|s| s.name.as_deref() == name)
        {
            return &mut self.sections[index];
        }
        self.sections.push(Section {
            name: name.map(str::to_string),
            entries: Vec::new(),
        });
        self.sections.last_mut().unwrap()
    }

    fn put_entry(&mut self, section: Option<&str>, key: &str, value: &str) {
        let section = self.section_mut(section);
        if let Some(entry) = section.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            section.entries.push((key.to_string(), value.to_string()));
        }
    }

    pub fn put(&mut self, section: &str, key: &str, value: &str) {
        self.put_entry(Some(section), key, value);
    }

    /// Sectionless variant for flat files like `gles2n64.conf`.
    pub fn put_global(&mut self, key: &str, value: &str) {
        self.put_entry(None, key, value);
    }

    fn get_entry(&self, section: Option<&str>, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name.as_deref() == section)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.get_entry(Some(section), key)
    }

    pub fn get_global(&self, key: &str) -> Option<&str> {
        self.get_entry(None, key)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            if let Some(name) = &section.name {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push('[');
                out.push_str(name);
                out.push_str("]\n");
            }
            for (key, value) in &section.entries {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    /// A write failure is fatal for the session: the core cannot start
    /// without valid configuration.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let mut file = File::create(path)?;
        file.write_all(self.render().as_bytes())?;
        Ok(())
    }
}

fn bool_01(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn bool_word(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

fn quoted(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

/// Populates both core configuration files from the user preferences.
/// Must run before the core starts.
pub fn sync_config_files(prefs: &Preferences, app_data: &AppData) -> CoreResult<()> {
    let mut cfg = ConfigFile::new();

    cfg.put("Core", "Version", "1.00");
    cfg.put("Core", "OnScreenDisplay", "False");
    cfg.put("Core", "R4300Emulator", &prefs.r4300_emulator);
    cfg.put("Core", "NoCompiledJump", "False");
    cfg.put("Core", "DisableExtraMem", "False");
    cfg.put("Core", "AutoStateSlotIncrement", "False");
    cfg.put("Core", "EnableDebugger", "False");
    cfg.put("Core", "CurrentStateSlot", "0");
    cfg.put("Core", "ScreenshotPath", "\"\"");
    cfg.put("Core", "SaveStatePath", &quoted(&prefs.slot_save_dir));
    cfg.put("Core", "SharedDataPath", "\"\"");

    cfg.put("CoreEvents", "Version", "1.00");
    for key in &[
        "Kbd Mapping Stop",
        "Kbd Mapping Fullscreen",
        "Kbd Mapping Save State",
        "Kbd Mapping Load State",
        "Kbd Mapping Increment Slot",
        "Kbd Mapping Reset",
        "Kbd Mapping Speed Down",
        "Kbd Mapping Speed Up",
        "Kbd Mapping Screenshot",
        "Kbd Mapping Pause",
        "Kbd Mapping Mute",
        "Kbd Mapping Increase Volume",
        "Kbd Mapping Decrease Volume",
        "Kbd Mapping Fast Forward",
        "Kbd Mapping Frame Advance",
        "Kbd Mapping Gameshark",
    ] {
        cfg.put("CoreEvents", key, "0");
    }

    cfg.put("Audio-SDL", "Version", "1.00");
    cfg.put("Audio-SDL", "SWAP_CHANNELS", bool_01(prefs.audio_swap_channels));
    cfg.put("Audio-SDL", "RESAMPLE", &prefs.audio_resample_alg);

    cfg.put("UI-Console", "Version", "1.00");
    cfg.put("UI-Console", "PluginDir", &quoted(&app_data.libs_dir));
    cfg.put("UI-Console", "VideoPlugin", &quoted(&prefs.video_plugin));
    cfg.put("UI-Console", "AudioPlugin", &quoted(&prefs.audio_plugin));
    cfg.put("UI-Console", "InputPlugin", &quoted(&prefs.input_plugin));
    cfg.put("UI-Console", "RspPlugin", &quoted(&prefs.rsp_plugin));

    cfg.put("Video-General", "Version", "1.00");

    cfg.put("Video-Rice", "Version", "1.00");
    cfg.put("Video-Rice", "SkipFrame", bool_01(prefs.rice_auto_frameskip));
    cfg.put(
        "Video-Rice",
        "FastTextureLoading",
        bool_01(prefs.rice_fast_texture_loading),
    );
    cfg.put(
        "Video-Rice",
        "FastTextureCRC",
        bool_01(prefs.rice_fast_texture_crc),
    );
    cfg.put(
        "Video-Rice",
        "LoadHiResTextures",
        bool_01(prefs.rice_hires_textures),
    );
    cfg.put("Video-Rice", "Mipmapping", &prefs.rice_mipmapping_alg);
    cfg.put(
        "Video-Rice",
        "TextureEnhancement",
        &prefs.rice_texture_enhancement,
    );
    cfg.put(
        "Video-Rice",
        "ForceTextureFilter",
        if prefs.rice_force_texture_filter {
            "2"
        } else {
            "0"
        },
    );

    for port in 1..=4 {
        sync_controller_section(&mut cfg, port, prefs.plugged[port - 1]);
    }

    cfg.save(&app_data.mupen64plus_cfg)?;

    let mut conf = ConfigFile::new();
    conf.put_global("enable fog", bool_01(prefs.n64_fog));
    conf.put_global("enable alpha test", bool_01(prefs.n64_alpha_test));
    conf.put_global("force screen clear", bool_01(prefs.n64_screen_clear));
    // hack z enabled means that depth test is disabled
    conf.put_global("hack z", bool_01(!prefs.n64_depth_test));
    conf.save(&app_data.gles2n64_conf)?;

    Ok(())
}

/// Per-port input section; ports differ only in the `plugged` value.
fn sync_controller_section(cfg: &mut ConfigFile, port: usize, plugged: bool) {
    let section = format!("Input-SDL-Control{}", port);

    cfg.put(&section, "Version", "1.00");
    cfg.put(&section, "plugged", bool_word(plugged));
    cfg.put(&section, "plugin", "2");
    cfg.put(&section, "device", "-2");
    cfg.put(&section, "mouse", "False");
    for key in &[
        "DPad R",
        "DPad L",
        "DPad D",
        "DPad U",
        "Start",
        "Z Trig",
        "B Button",
        "A Button",
        "C Button R",
        "C Button L",
        "C Button D",
        "C Button U",
        "R Trig",
        "L Trig",
        "Mempak switch",
        "Rumblepak switch",
    ] {
        cfg.put(&section, key, "key(0)");
    }
    cfg.put(&section, "X Axis", "key(0,0)");
    cfg.put(&section, "Y Axis", "key(0,0)");
}
