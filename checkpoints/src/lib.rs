pub mod bootstrap;
pub mod branch;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod shared;
pub mod store;

#[cfg(test)]
mod testing;

pub use bootstrap::{bootstrap, BootstrapReport, IGNORE_FILE, IGNORE_RULES};
pub use branch::{branch_name, sanitize_component};
pub use config::{CheckpointConfig, RemoteConfig, DEFAULT_MAX_CHECKPOINTS, DEFAULT_TIMEZONE};
pub use error::{CheckpointError, CheckpointResult};
pub use event::HistoryEvent;
pub use model::{Checkpoint, CheckpointModelBuilder, HistoryEntry};
pub use shared::SharedCheckpointStore;
pub use store::{checkpoint_path, CheckpointStore};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::model::*;
    pub use crate::shared::*;
    pub use crate::store::*;

    pub use vcs::prelude::*;
}
