// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use prism_core::{init_tracing, FpsCounter};
use prism_platform::WindowHost;
use prism_render::{FrameOutcome, HostStatus, RenderError, Renderer, SurfaceHost};
use prism_render_vk::VkRenderer;
use tracing::{error, info};

mod config;

use config::{AppCfg, VsyncMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Spinning cube on the prism frame pipeliner", long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// Frames the CPU may record ahead of the GPU (1..=3)
    #[arg(long)]
    frames_in_flight: Option<usize>,
    /// Vulkan validation layer; bare `--validation` means true
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    validation: Option<bool>,
    #[arg(long, value_enum)]
    vsync_mode: Option<VsyncMode>,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) -> Result<()> {
        if let Some(n) = self.frames_in_flight {
            cfg.render.frames_in_flight = n;
        }
        if let Some(v) = self.validation {
            cfg.render.validation = v;
        }
        if let Some(m) = self.vsync_mode {
            cfg.render.vsync = true;
            cfg.render.vsync_mode = m;
        }
        cfg.validate().context("command line")
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let cfg = AppCfg::load(&args.config).and_then(|mut cfg| {
        args.apply(&mut cfg)?;
        Ok(cfg)
    });
    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing("info");
            error!("configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cfg.log.filter);

    match run(&cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<RenderError>() {
                Some(r) => error!(kind = ?r.kind(), "{e:#}"),
                None => error!("{e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: &AppCfg) -> Result<()> {
    let mut host = WindowHost::new(&cfg.window.title, cfg.window_size())?;
    let settings = cfg.render_settings();
    info!(
        "present mode {:?}, {} frames in flight, validation {}",
        settings.present_mode, settings.frames_in_flight, settings.validation
    );

    let window = host.window().context("window vanished during start-up")?;
    let mut renderer = VkRenderer::new(window, window, host.drawable_size(), &settings)
        .context("vulkan init")?;

    let mut fps = FpsCounter::new(Duration::from_secs(1));
    let mut stalled = false;
    loop {
        if host.pump() == HostStatus::Closing {
            break;
        }
        match renderer.render(&mut host) {
            Ok(FrameOutcome::Presented { .. }) => {
                fps.frame();
                if std::mem::take(&mut stalled) {
                    fps.restart(Instant::now());
                }
            }
            Ok(FrameOutcome::Skipped) => stalled = true,
            Ok(FrameOutcome::Closed) => break,
            Err(e) => {
                return Err(e).with_context(|| format!("frame {}", renderer.frame_number()));
            }
        }
        if let Some(rate) = fps.tick(Instant::now()) {
            info!("fps: {rate:.1}");
        }
    }

    info!("closing after {} frames", renderer.frame_number());
    // GPU objects go before the window they present to.
    drop(renderer);
    drop(host);
    Ok(())
}
