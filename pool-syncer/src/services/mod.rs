//! Sync services
//!
//! Resume point selection, bounded retries and the chain-sync driver.

pub mod resume;
pub mod retry;
pub mod syncer;

pub use resume::ResumeManager;
pub use retry::RetryPolicy;
pub use syncer::{SyncDriver, SyncSettings, SyncState, SyncStats};
