//! Logbus Core Library
//!
//! A process-wide log bus: structured entries go in, and each configured
//! writer receives the entries its level filter accepts, rendered by its own
//! formatter.
//!
//! ## Overview
//!
//! - **Levels**: an ordered, per-session level set with `info`/`INFO`/`Info`
//!   shortcuts
//! - **Backlog**: entries logged while stopped or paused are held and
//!   replayed in order on `start()`/`resume()`
//! - **History**: a bounded record of recently dispatched entries
//! - **Writers**: console, null, date-rotated files with housekeeping, and
//!   a subprocess writer that relays entries to a parent engine
//!
//! ## Quick Start
//!
//! ```ignore
//! use logbus_core::{Engine, EngineConfig};
//!
//! fn main() -> Result<(), logbus_core::LogError> {
//!     let mut engine = Engine::new();
//!     engine.init(EngineConfig::default().with_levels("info,warn,error"))?;
//!     engine.start()?;
//!
//!     engine.shortcut("info").unwrap().log("service ready")?;
//!     engine.log("warn", Some("db"), "slow query", vec![serde_json::json!(812)])?;
//!
//!     engine.stop()?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod events;
pub mod formatters;
pub mod handle;
pub mod layer;
pub mod level;
pub mod plugin;
pub mod relay;
pub mod writers;

use std::sync::OnceLock;

use parking_lot::{Mutex, MutexGuard};

// Re-exports
pub use buffer::{Backlog, History};
pub use config::{EngineConfig, WriterSpec};
pub use engine::{Engine, EngineState, LevelRef, Shortcut};
pub use entry::{HostContext, LogEntry, Message};
pub use error::{LogError, LogResult};
pub use events::EngineEvent;
pub use handle::LogHandle;
pub use layer::EngineLayer;
pub use level::{Level, LevelSpec, DEFAULT_LEVELS};
pub use plugin::{LevelFilter, LogFormatter, LogWriter, WriterContext};
pub use relay::{ChannelSource, ChildSource, RelayEntry, RelayLink, RelayMessage, RelaySource};
pub use writers::{ConsoleWriter, FileWriter, NullWriter, SubprocessWriter};

/// The process-wide engine, created on first use.
///
/// The guard holds the engine lock; keep it short-lived.
pub fn global() -> MutexGuard<'static, Engine> {
    static ENGINE: OnceLock<Mutex<Engine>> = OnceLock::new();
    ENGINE.get_or_init(|| Mutex::new(Engine::new())).lock()
}
