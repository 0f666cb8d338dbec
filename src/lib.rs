//! Runtime core of a minimal process supervisor.
//!
//! A [`ProcessController`] owns one external command and drives it through an explicit state
//! machine (`stopped`, `running`, `retry wait`, `fatal`) in response to `start`, `stop` and
//! `restart` events.

pub mod configs;
pub mod fsm;
pub mod process;
pub mod program;
pub mod settings;

pub use crate::process::{Event, ProcessController, Snapshot, State};
pub use crate::program::ProgramSpec;
pub use crate::settings::ControllerSettings;
