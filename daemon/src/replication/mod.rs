//! The replication subsystem: cursor, state machine, planet client,
//! workers and the round driver.

pub mod driver;
pub mod frequency;
pub mod planet;
pub mod remote;
pub mod resume;
pub mod state;
pub mod task;
pub mod worker;

pub use driver::{
    CAUGHT_UP_DELAY, CAUGHT_UP_WINDOW_MINUTES, Clock, DriverSettings, SystemClock, monitor_changes,
    monitor_changesets, run_rounds,
};
pub use frequency::ReplicationFrequency;
pub use planet::{
    DOWNLOAD_SANITY_FLOOR, PlanetClient, fetch_first_state, fetch_last_state, fetch_state_at,
};
pub use remote::{RemoteUrl, parse_triple_path, sequence_to_path, split_sequence};
pub use resume::resume_cursor;
pub use state::{StateFile, StateStore};
pub use task::{TaskOutcome, TaskStatus, closest_to};
pub use worker::{ChangeWorker, ChangesetWorker, MAX_MIRROR_RETRIES};
