//! The display loop.
//!
//! One cooperating thread pulls a frame from every pipeline per iteration,
//! applies pending hotkey commands, presents, and hands the frame back.
//! Everything touching windows or the keyboard stays on this thread.
//!
//! Sensors in master mode drive the sync signal for their slaves, so
//! masters start first and stop last; getting this wrong hangs the driver's
//! stream start.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::display::present::{KeyCode, Presenter, KEY_ENTER, KEY_ESC};
use crate::display::snapshot::{SaveFormat, SnapshotSink};
use crate::error::DisplayError;
use crate::pipeline::{Pipeline, SyncRole};

const SAVE_NONE: u8 = 0;
const SAVE_PNG: u8 = 1;
const SAVE_JPEG: u8 = 2;
const SAVE_TIFF: u8 = 3;

/// One-shot commands raised by hotkey actions and consumed by the next loop
/// iteration. Cleared once per iteration whether or not they were applied.
#[derive(Default)]
pub struct PendingCommands {
    toggle_fps: AtomicBool,
    toggle_crosshair: AtomicBool,
    save: AtomicU8,
    stream_active: AtomicBool,
}

impl PendingCommands {
    fn save_format(&self) -> Option<SaveFormat> {
        match self.save.load(Ordering::Relaxed) {
            SAVE_PNG => Some(SaveFormat::Png),
            SAVE_JPEG => Some(SaveFormat::Jpeg),
            SAVE_TIFF => Some(SaveFormat::Tiff),
            _ => None,
        }
    }

    fn request_save(&self, format: SaveFormat) {
        let encoded = match format {
            SaveFormat::Png => SAVE_PNG,
            SaveFormat::Jpeg => SAVE_JPEG,
            SaveFormat::Tiff => SAVE_TIFF,
        };
        self.save.store(encoded, Ordering::Relaxed);
    }

    fn clear_iteration(&self) {
        self.toggle_fps.store(false, Ordering::Relaxed);
        self.toggle_crosshair.store(false, Ordering::Relaxed);
        self.save.store(SAVE_NONE, Ordering::Relaxed);
    }

    pub fn request_quit(&self) {
        self.stream_active.store(false, Ordering::Release);
    }
}

/// A named action bound to one or more key codes.
pub struct HotkeyAction {
    keys: Vec<KeyCode>,
    description: String,
    action: Box<dyn Fn()>,
}

impl HotkeyAction {
    fn new(keys: &[KeyCode], description: &str, action: impl Fn() + 'static) -> Self {
        let key_list = keys
            .iter()
            .map(|&k| key_label(k))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            keys: keys.to_vec(),
            description: format!("{key_list} - {description}"),
            action: Box::new(action),
        }
    }

    fn matches(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

fn key_label(key: KeyCode) -> String {
    match key {
        KEY_ENTER => "ENTER".to_string(),
        KEY_ESC => "ESC".to_string(),
        _ => char::from_u32(key).map(String::from).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Configuring,
    Running,
    ShuttingDown,
    Stopped,
}

/// Owns every pipeline plus the hotkey table and runs the presentation loop.
pub struct DisplayEngine<P: Presenter, S: SnapshotSink> {
    pipelines: Vec<Pipeline>,
    hotkeys: Vec<HotkeyAction>,
    pending: Arc<PendingCommands>,
    presenter: P,
    snapshots: S,
    state: EngineState,
}

impl<P: Presenter, S: SnapshotSink> DisplayEngine<P, S> {
    pub fn new(
        pipelines: Vec<Pipeline>,
        presenter: P,
        snapshots: S,
    ) -> Result<Self, DisplayError> {
        if pipelines.is_empty() {
            return Err(DisplayError::NoPipelines);
        }
        let mut engine = Self {
            pipelines,
            hotkeys: Vec::new(),
            pending: Arc::new(PendingCommands::default()),
            presenter,
            snapshots,
            state: EngineState::Configuring,
        };
        engine.register_default_hotkeys();
        Ok(engine)
    }

    /// Bind keys to an action. Bindings are evaluated in registration order
    /// and the first match wins: a key already claimed by an earlier binding
    /// makes the later binding unreachable for that key.
    pub fn register_hotkey(
        &mut self,
        keys: &[KeyCode],
        description: &str,
        action: impl Fn() + 'static,
    ) {
        self.hotkeys
            .push(HotkeyAction::new(keys, description, action));
    }

    fn register_default_hotkeys(&mut self) {
        let pending = Arc::clone(&self.pending);
        self.register_hotkey(&['f' as u32, 'F' as u32], "Toggle FPS counter", move || {
            pending.toggle_fps.store(true, Ordering::Relaxed);
        });

        let pending = Arc::clone(&self.pending);
        self.register_hotkey(
            &['c' as u32, 'C' as u32],
            "Toggle Crosshair overlay",
            move || {
                pending.toggle_crosshair.store(true, Ordering::Relaxed);
            },
        );

        let pending = Arc::clone(&self.pending);
        self.register_hotkey(
            &['p' as u32, 'P' as u32],
            "Save snapshot in PNG format",
            move || pending.request_save(SaveFormat::Png),
        );

        let pending = Arc::clone(&self.pending);
        self.register_hotkey(
            &['j' as u32, 'J' as u32],
            "Save snapshot in JPEG format",
            move || pending.request_save(SaveFormat::Jpeg),
        );

        let pending = Arc::clone(&self.pending);
        self.register_hotkey(
            &['t' as u32, 'T' as u32],
            "Save snapshot in TIFF format",
            move || pending.request_save(SaveFormat::Tiff),
        );

        let pending = Arc::clone(&self.pending);
        self.register_hotkey(
            &['q' as u32, 'Q' as u32, KEY_ENTER, KEY_ESC],
            "Exit application",
            move || pending.request_quit(),
        );
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Shared quit flag, for wiring up external stop signals.
    pub fn pending(&self) -> Arc<PendingCommands> {
        Arc::clone(&self.pending)
    }

    /// Start everything, run until the quit action fires, stop everything.
    pub fn run(&mut self) -> Result<(), DisplayError> {
        self.start_pipelines()?;
        self.log_hotkeys();

        for pipeline in &self.pipelines {
            self.presenter.open_window(pipeline.name())?;
        }

        self.pending.stream_active.store(true, Ordering::Release);
        self.state = EngineState::Running;

        let result = self.run_loop();

        self.state = EngineState::ShuttingDown;
        self.stop_pipelines();
        self.state = EngineState::Stopped;
        result
    }

    fn run_loop(&mut self) -> Result<(), DisplayError> {
        while self.pending.stream_active.load(Ordering::Acquire) {
            for pipeline in &mut self.pipelines {
                // None means the pipeline is tearing down underneath us.
                let Some(frame) = pipeline.get_frame() else {
                    continue;
                };

                if frame.is_valid() {
                    if self.pending.toggle_crosshair.load(Ordering::Relaxed) {
                        pipeline.toggle_crosshair();
                    }
                    if self.pending.toggle_fps.load(Ordering::Relaxed) {
                        pipeline.toggle_show_fps();
                    }

                    self.presenter.show(pipeline.name(), &frame)?;

                    if let Some(format) = self.pending.save_format() {
                        if let Err(e) =
                            self.snapshots.save(&frame, pipeline.clean_name(), format)
                        {
                            warn!(pipeline = pipeline.name(), "snapshot failed: {e}");
                        }
                    }
                }

                pipeline.return_frame(frame);
            }

            self.pending.clear_iteration();

            if let Some(key) = self.presenter.poll_key(Duration::from_millis(1)) {
                self.dispatch(key);
            }
        }
        Ok(())
    }

    /// Masters first, then slaves. A failure rolls the already-started
    /// pipelines back in reverse and aborts the session.
    fn start_pipelines(&mut self) -> Result<(), DisplayError> {
        let order: Vec<usize> = self
            .order_by_role(SyncRole::Master)
            .chain(self.order_by_role(SyncRole::Slave))
            .collect();

        for (position, &index) in order.iter().enumerate() {
            if let Err(e) = self.pipelines[index].start() {
                warn!(
                    pipeline = self.pipelines[index].name(),
                    "pipeline failed to start, aborting session"
                );
                for &started in order[..position].iter().rev() {
                    self.pipelines[started].stop();
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Slaves first, then masters - the reverse of the start constraint.
    fn stop_pipelines(&mut self) {
        let order: Vec<usize> = self
            .order_by_role(SyncRole::Slave)
            .chain(self.order_by_role(SyncRole::Master))
            .collect();
        for index in order {
            self.pipelines[index].stop();
        }
    }

    fn order_by_role(&self, role: SyncRole) -> impl Iterator<Item = usize> + '_ {
        self.pipelines
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.role() == role)
            .map(|(i, _)| i)
    }

    fn dispatch(&self, key: KeyCode) {
        for hotkey in &self.hotkeys {
            if hotkey.matches(key) {
                (hotkey.action)();
                return;
            }
        }
    }

    fn log_hotkeys(&self) {
        info!("Available hotkeys:");
        for hotkey in &self.hotkeys {
            info!("  {}", hotkey.description());
        }
    }
}
