// SPDX-License-Identifier: CEPL-1.0
//! `prism.toml` loading.

use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use anyhow::{bail, Context, Result};
use prism_render::{PresentMode, RenderSettings, RenderSize, MAX_FRAMES_IN_FLIGHT};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

impl From<VsyncMode> for PresentMode {
    fn from(m: VsyncMode) -> Self {
        match m {
            VsyncMode::Fifo => PresentMode::Fifo,
            VsyncMode::Mailbox => PresentMode::Mailbox,
            VsyncMode::Immediate => PresentMode::Immediate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "prism".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    /// Off means `immediate` regardless of `vsync_mode`.
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub frames_in_flight: usize,
    pub extra_images: u32,
    /// Absent means wait forever.
    pub fence_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let d = RenderSettings::default();
        Self {
            clear_color: d.clear_color,
            vsync: true,
            vsync_mode: VsyncMode::Fifo,
            frames_in_flight: d.frames_in_flight,
            extra_images: d.extra_images,
            fence_timeout_ms: None,
            acquire_timeout_ms: None,
            validation: d.validation,
        }
    }
}

impl RenderCfg {
    pub fn present_mode(&self) -> PresentMode {
        if self.vsync {
            self.vsync_mode.into()
        } else {
            PresentMode::Immediate
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogCfg {
    pub filter: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub log: LogCfg,
}

impl AppCfg {
    /// Missing file yields defaults; anything unreadable or malformed is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.render;
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&r.frames_in_flight) {
            bail!(
                "render.frames_in_flight must be 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                r.frames_in_flight
            );
        }
        if self.window.width == 0 || self.window.height == 0 {
            bail!(
                "window size must be non-zero, got {}x{}",
                self.window.width,
                self.window.height
            );
        }
        if r.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            bail!("render.clear_color components must be in 0..=1");
        }
        if r.fence_timeout_ms == Some(0) || r.acquire_timeout_ms == Some(0) {
            bail!("timeouts must be positive; omit them to wait forever");
        }
        Ok(())
    }

    pub fn window_size(&self) -> RenderSize {
        RenderSize {
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        let r = &self.render;
        let ms = |v: Option<u64>| v.map_or(Duration::MAX, Duration::from_millis);
        RenderSettings {
            app_name: self.window.title.clone(),
            clear_color: r.clear_color,
            present_mode: r.present_mode(),
            frames_in_flight: r.frames_in_flight,
            extra_images: r.extra_images,
            fence_timeout: ms(r.fence_timeout_ms),
            acquire_timeout: ms(r.acquire_timeout_ms),
            validation: r.validation,
        }
    }
}
