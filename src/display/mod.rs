pub mod engine;
pub mod present;
pub mod snapshot;

pub use engine::{DisplayEngine, EngineState, HotkeyAction, PendingCommands};
pub use present::{KeyCode, Presenter, Sdl2Presenter, KEY_ENTER, KEY_ESC};
pub use snapshot::{ImageSnapshotWriter, SaveFormat, SnapshotSink};
