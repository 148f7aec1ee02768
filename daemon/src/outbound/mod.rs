//! Outbound adapters: PostgreSQL persistence, the plugin loader and the
//! tasking-manager user source.

pub mod persistence;
pub mod plugin;
pub mod tasking_manager;

pub use persistence::{Db, escape_literal};
pub use plugin::LoadedValidator;
pub use tasking_manager::TaskingManagerDirectory;
