// Library surface for the binary, integration tests and other embedders.
// The measurement core (clock, classifier, filter, frames, engine) has no
// terminal dependencies; `runtime` and `terminal` adapt it to crossterm.
pub mod app_dirs;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod engine;
pub mod filter;
pub mod frames;
pub mod history;
pub mod reporter;
pub mod runtime;
pub mod session;
pub mod terminal;
pub mod util;

pub use engine::{Command, Engine, EngineConfig};
pub use session::{Session, Snapshot};
