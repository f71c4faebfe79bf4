//! GLFW window for the Vulkan viewer
//!
//! Owns the window on the main thread. Cursor lock requests coming from the renderer's
//! update unit arrive over a channel and are applied when events are pumped.

use std::sync::mpsc::{self, Receiver, Sender};

use ash::vk;
use glfw::{Action, Key, WindowEvent};
use thiserror::Error;

use render_runtime::foundation::math::{Vec2, Vec3};
use render_runtime::render::backends::vulkan::{SurfaceProvider, VulkanError, VulkanResult};
use render_runtime::render::primitives::{CameraRigKind, CursorControl, RigInput};

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorRequest {
    Lock,
    Unlock,
}

/// [`CursorControl`] that forwards requests to the window thread
#[derive(Debug, Clone)]
pub struct ChannelCursor {
    sender: Sender<CursorRequest>,
}

impl CursorControl for ChannelCursor {
    fn lock_cursor(&mut self) {
        let _ = self.sender.send(CursorRequest::Lock);
    }

    fn unlock_cursor(&mut self) {
        let _ = self.sender.send(CursorRequest::Unlock);
    }
}

/// What the window observed while pumping events
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WindowActions {
    /// The user asked to close the window
    pub close: bool,
    /// New framebuffer size, zero while minimized
    pub resized: Option<(u32, u32)>,
    /// Rig selected with the number keys
    pub rig: Option<CameraRigKind>,
}

/// GLFW window wrapper
pub struct ViewerWindow {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, WindowEvent)>,
    cursor_requests: Receiver<CursorRequest>,
    cursor_sender: Sender<CursorRequest>,
    last_cursor: Option<(f64, f64)>,
    look_delta: Vec2,
}

impl ViewerWindow {
    /// Create a resizable window with no client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);
        window.set_iconify_polling(true);
        window.set_cursor_pos_polling(true);

        let (cursor_sender, cursor_requests) = mpsc::channel();

        Ok(Self {
            glfw,
            window,
            events,
            cursor_requests,
            cursor_sender,
            last_cursor: None,
            look_delta: Vec2::zeros(),
        })
    }

    /// Cursor control handed to the renderer's camera rig
    pub fn cursor_control(&self) -> ChannelCursor {
        ChannelCursor {
            sender: self.cursor_sender.clone(),
        }
    }

    /// Poll GLFW and translate events
    pub fn pump(&mut self) -> WindowActions {
        self.glfw.poll_events();
        self.apply_cursor_requests();

        let mut actions = WindowActions::default();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                WindowEvent::Close | WindowEvent::Key(Key::Escape, _, Action::Press, _) => actions.close = true,
                WindowEvent::FramebufferSize(width, height) => {
                    actions.resized = Some((clamp_dimension(width), clamp_dimension(height)));
                }
                WindowEvent::Iconify(false) => {
                    let (width, height) = self.window.get_framebuffer_size();
                    actions.resized = Some((clamp_dimension(width), clamp_dimension(height)));
                }
                WindowEvent::Key(key, _, Action::Press, _) => {
                    actions.rig = match key {
                        Key::Num1 => Some(CameraRigKind::Fixed),
                        Key::Num2 => Some(CameraRigKind::Orbit),
                        Key::Num3 => Some(CameraRigKind::Freecam),
                        _ => actions.rig,
                    };
                }
                WindowEvent::CursorPos(x, y) => {
                    if let Some((last_x, last_y)) = self.last_cursor {
                        self.look_delta += Vec2::new((x - last_x) as f32, (y - last_y) as f32);
                    }
                    self.last_cursor = Some((x, y));
                }
                _ => {}
            }
        }
        actions
    }

    /// Movement keys and accumulated cursor motion since the last call
    pub fn take_rig_input(&mut self) -> RigInput {
        let axis = |positive: Key, negative: Key| -> f32 {
            let pressed = |key| self.window.get_key(key) == Action::Press;
            f32::from(u8::from(pressed(positive))) - f32::from(u8::from(pressed(negative)))
        };

        let input = RigInput {
            movement: Vec3::new(axis(Key::D, Key::A), axis(Key::E, Key::Q), axis(Key::W, Key::S)),
            look_delta: self.look_delta,
            boost: self.window.get_key(Key::LeftShift) == Action::Press,
        };
        self.look_delta = Vec2::zeros();
        input
    }

    fn apply_cursor_requests(&mut self) {
        while let Ok(request) = self.cursor_requests.try_recv() {
            let mode = match request {
                CursorRequest::Lock => glfw::CursorMode::Disabled,
                CursorRequest::Unlock => glfw::CursorMode::Normal,
            };
            log::debug!("Cursor mode -> {:?}", mode);
            self.window.set_cursor_mode(mode);
            self.last_cursor = None;
        }
    }
}

impl SurfaceProvider for ViewerWindow {
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::InitializationFailed("GLFW reports no Vulkan support".to_string()))
    }

    fn create_surface(&mut self, instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::Api(result))
        }
    }

    fn framebuffer_extent(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (clamp_dimension(width), clamp_dimension(height))
    }
}

fn clamp_dimension(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
