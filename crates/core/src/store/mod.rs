pub mod activity_log;
pub mod state_sync;
