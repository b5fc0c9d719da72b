//! Presentation collaborator: windows, frame rendering, key polling.
//!
//! All of this runs on the display loop's thread only; SDL window and event
//! handles never cross threads.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sdl2::event::Event;
use sdl2::keyboard::{Keycode, Mod};
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::Canvas;
use sdl2::video::Window;
use tracing::{info, instrument};

use crate::capture::frame::DisplayFrame;
use crate::error::DisplayError;

/// Key codes as the display loop sees them: ASCII for printable keys plus
/// the two special codes below.
pub type KeyCode = u32;

pub const KEY_ENTER: KeyCode = 13;
pub const KEY_ESC: KeyCode = 27;

pub trait Presenter {
    fn open_window(&mut self, name: &str) -> Result<(), DisplayError>;

    fn show(&mut self, name: &str, frame: &DisplayFrame) -> Result<(), DisplayError>;

    /// Poll for at most one pressed key, waiting up to `timeout`.
    fn poll_key(&mut self, timeout: Duration) -> Option<KeyCode>;
}

/// SDL2-backed presenter: one window per stream, streaming RGB24 textures.
pub struct Sdl2Presenter {
    video: sdl2::VideoSubsystem,
    event_pump: sdl2::EventPump,
    windows: HashMap<String, Canvas<Window>>,
}

impl Sdl2Presenter {
    pub fn new(sdl: &sdl2::Sdl) -> Result<Self, DisplayError> {
        let video = sdl.video().map_err(DisplayError::Sdl)?;
        let event_pump = sdl.event_pump().map_err(DisplayError::Sdl)?;
        Ok(Self {
            video,
            event_pump,
            windows: HashMap::new(),
        })
    }
}

impl Presenter for Sdl2Presenter {
    #[instrument(skip(self))]
    fn open_window(&mut self, name: &str) -> Result<(), DisplayError> {
        if self.windows.contains_key(name) {
            return Ok(());
        }
        // Sized properly once the first frame arrives.
        let window = self
            .video
            .window(name, 640, 480)
            .position_centered()
            .resizable()
            .build()
            .map_err(|e| DisplayError::Sdl(e.to_string()))?;
        let canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(|e| DisplayError::Sdl(e.to_string()))?;
        info!(window = name, "opened display window");
        self.windows.insert(name.to_string(), canvas);
        Ok(())
    }

    fn show(&mut self, name: &str, frame: &DisplayFrame) -> Result<(), DisplayError> {
        let render_start = Instant::now();

        let canvas = self
            .windows
            .get_mut(name)
            .ok_or_else(|| DisplayError::UnknownWindow {
                window: name.to_string(),
            })?;

        if canvas.window().size() != (frame.width, frame.height) {
            let _ = canvas.window_mut().set_size(frame.width, frame.height);
        }

        let texture_creator = canvas.texture_creator();
        let mut texture = texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, frame.width, frame.height)
            .map_err(|e| DisplayError::Sdl(e.to_string()))?;
        texture
            .update(None, &frame.data, (frame.width * 3) as usize)
            .map_err(|e| DisplayError::Sdl(e.to_string()))?;

        canvas.clear();
        canvas
            .copy(&texture, None, None)
            .map_err(DisplayError::Sdl)?;
        canvas.present();

        metrics::histogram!("render_time_us").record(render_start.elapsed().as_micros() as f64);
        Ok(())
    }

    fn poll_key(&mut self, timeout: Duration) -> Option<KeyCode> {
        // Drain the whole queue: window and mouse traffic between two polls
        // must not delay a key press to a later iteration.
        let mut event = self
            .event_pump
            .wait_event_timeout(timeout.as_millis() as u32)?;
        loop {
            if let Some(key) = map_event(&event) {
                return Some(key);
            }
            event = self.event_pump.poll_event()?;
        }
    }
}

fn map_event(event: &Event) -> Option<KeyCode> {
    match event {
        Event::Quit { .. } => Some(KEY_ESC),
        Event::KeyDown {
            keycode: Some(keycode),
            keymod,
            ..
        } => map_keycode(*keycode, *keymod),
        _ => None,
    }
}

fn map_keycode(keycode: Keycode, keymod: Mod) -> Option<KeyCode> {
    if keycode == Keycode::Return || keycode == Keycode::KpEnter {
        return Some(KEY_ENTER);
    }
    if keycode == Keycode::Escape {
        return Some(KEY_ESC);
    }
    let raw = keycode.into_i32();
    if !(32..=126).contains(&raw) {
        return None;
    }
    let mut c = raw as u8 as char;
    let shifted = keymod.intersects(Mod::LSHIFTMOD | Mod::RSHIFTMOD | Mod::CAPSMOD);
    if shifted && c.is_ascii_alphabetic() {
        c = c.to_ascii_uppercase();
    }
    Some(c as KeyCode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_map_to_ascii_with_shift_handling() {
        assert_eq!(map_keycode(Keycode::F, Mod::NOMOD), Some('f' as u32));
        assert_eq!(map_keycode(Keycode::F, Mod::LSHIFTMOD), Some('F' as u32));
        assert_eq!(map_keycode(Keycode::Return, Mod::NOMOD), Some(KEY_ENTER));
        assert_eq!(map_keycode(Keycode::KpEnter, Mod::NOMOD), Some(KEY_ENTER));
        assert_eq!(map_keycode(Keycode::Escape, Mod::NOMOD), Some(KEY_ESC));
        assert_eq!(map_keycode(Keycode::F1, Mod::NOMOD), None);
    }

    #[test]
    fn only_key_events_map_to_key_codes() {
        assert_eq!(map_event(&Event::Quit { timestamp: 0 }), Some(KEY_ESC));
        let typed = Event::TextInput {
            timestamp: 0,
            window_id: 0,
            text: "f".into(),
        };
        assert_eq!(map_event(&typed), None);
        let pressed = Event::KeyDown {
            timestamp: 0,
            window_id: 0,
            keycode: Some(Keycode::Q),
            scancode: None,
            keymod: Mod::NOMOD,
            repeat: false,
        };
        assert_eq!(map_event(&pressed), Some('q' as u32));
    }
}
