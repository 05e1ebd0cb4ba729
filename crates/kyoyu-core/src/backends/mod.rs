//! Store backends.
//!
//! Both backends implement every trait in [`crate::store`] for tasks and
//! finances, and both defer profile creation until
//! `provision_profiles()` runs, mimicking a backend trigger that fires some
//! time after sign-up.

mod memory;
mod sqlite;

pub use memory::{FetchSide, MemoryBackend};
pub use sqlite::{SqlPayload, SqliteBackend};
