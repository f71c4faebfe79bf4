//! Cube grid viewer
//!
//! Drives the renderer's lifecycle jobs from a worker pool while the main thread owns
//! the window, forwards input to the camera rig and animates the demo scene.
//!
//! ```text
//! viewer [--config viewer.toml] [--shaders DIR] [--headless] [--frames N]
//! ```

mod demo;
mod scheduler;
mod window;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use render_runtime::config::Config;
use render_runtime::core::ApplicationConfig;
use render_runtime::foundation::logging;
use render_runtime::lifecycle::JobError;
use render_runtime::render::api::GpuDevice;
use render_runtime::render::backends::headless::{HeadlessConfig, HeadlessDevice};
use render_runtime::render::backends::vulkan::VulkanDevice;
use render_runtime::render::primitives::NoCursor;
use render_runtime::renderer::{AssetLoader, Renderer};

use demo::{DemoLoader, DemoScene, ShaderSource};
use window::ViewerWindow;

const GRID_SIDE: usize = 6;
const HEADLESS_FRAME_DEFAULT: u64 = 120;

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug)]
struct Args {
    config: PathBuf,
    shaders: PathBuf,
    headless: bool,
    frames: u64,
}

impl Args {
    fn parse() -> AppResult<Self> {
        let mut args = Self {
            config: PathBuf::from("viewer.toml"),
            shaders: PathBuf::from("target/shaders"),
            headless: false,
            frames: HEADLESS_FRAME_DEFAULT,
        };

        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--headless" => args.headless = true,
                "--config" => args.config = iter.next().ok_or("--config needs a path")?.into(),
                "--shaders" => args.shaders = iter.next().ok_or("--shaders needs a directory")?.into(),
                "--frames" => args.frames = iter.next().ok_or("--frames needs a count")?.parse()?,
                other => return Err(format!("Unknown argument '{other}'").into()),
            }
        }
        Ok(args)
    }
}

fn main() -> AppResult<()> {
    let args = Args::parse()?;
    let config = ApplicationConfig::load_or_default(&args.config)?;
    logging::init_with_level(&config.engine.log_level);
    config.validate()?;

    log::info!("Starting viewer ({})", if args.headless { "headless" } else { "vulkan" });

    let errors = if args.headless {
        run_headless(&config, args.frames)?
    } else {
        run_windowed(&config, args.shaders)?
    };

    if errors.is_empty() {
        log::info!("Viewer finished cleanly");
        Ok(())
    } else {
        for error in &errors {
            log::error!("Lifecycle error: {}", error);
        }
        Err(format!("{} lifecycle job(s) failed", errors.len()).into())
    }
}

fn run_windowed(config: &ApplicationConfig, shaders: PathBuf) -> AppResult<Vec<JobError>> {
    let mut window = ViewerWindow::new(&config.window.title, config.window.width, config.window.height)?;
    let device = VulkanDevice::new(&mut window, &config.renderer)?;
    let renderer = Arc::new(Renderer::new(
        device,
        DemoLoader::new(ShaderSource::Directory(shaders)),
        config,
        Box::new(window.cursor_control()),
    )?);
    let driver = scheduler::spawn_driver(Arc::clone(&renderer), config.engine.worker_threads)?;

    let mut scene = DemoScene::default();
    let mut last_frame = Instant::now();
    while !renderer.is_finished_shutdown() {
        let actions = window.pump();
        if actions.close {
            renderer.request_close();
        }
        if let Some((width, height)) = actions.resized {
            renderer.notify_resized(width, height);
        }
        if let Some(kind) = actions.rig {
            log::info!("Camera rig -> {:?}", kind);
            renderer.set_camera_rig(kind);
        }
        renderer.submit_rig_input(window.take_rig_input());

        let now = Instant::now();
        step_scene(&renderer, &mut scene, now.duration_since(last_frame));
        last_frame = now;

        std::thread::sleep(Duration::from_millis(4));
    }

    join_driver(driver)
}

fn run_headless(config: &ApplicationConfig, frames: u64) -> AppResult<Vec<JobError>> {
    let device = HeadlessDevice::new(HeadlessConfig {
        extent: (config.window.width, config.window.height),
        ..HeadlessConfig::default()
    })?;
    let renderer = Arc::new(Renderer::new(
        device,
        DemoLoader::new(ShaderSource::Placeholder),
        config,
        Box::new(NoCursor),
    )?);
    let driver = scheduler::spawn_driver(Arc::clone(&renderer), config.engine.worker_threads)?;

    let mut scene = DemoScene::default();
    let step = Duration::from_millis(16);
    let mut close_requested = false;
    while !renderer.is_finished_shutdown() {
        step_scene(&renderer, &mut scene, step);
        if !close_requested && renderer.frame_number() >= frames {
            log::info!("Rendered {} frames, closing", renderer.frame_number());
            renderer.request_close();
            close_requested = true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    join_driver(driver)
}

/// Populate the scene once the renderer is built, then keep it moving
fn step_scene<D: GpuDevice, L: AssetLoader<D>>(renderer: &Renderer<D, L>, scene: &mut DemoScene, dt: Duration) {
    if renderer.fault().is_some() {
        return;
    }
    if !scene.is_populated() {
        // NotBuilt until the build unit has run
        if scene.populate(renderer, GRID_SIDE).is_err() {
            scene.clear(renderer);
        }
        return;
    }
    if let Err(e) = scene.animate(renderer, dt.as_secs_f32()) {
        log::warn!("Scene animation failed: {}", e);
    }
}

fn join_driver(driver: JoinHandle<Vec<JobError>>) -> AppResult<Vec<JobError>> {
    driver.join().map_err(|_| "Render driver thread panicked".into())
}
