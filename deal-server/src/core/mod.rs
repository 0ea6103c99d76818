pub mod config;
pub mod error;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use error::{ServerError, ServerResult};
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskHealth, TaskKind};
