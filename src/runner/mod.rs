//! Long-running tasks built on the session layer: scheduled check-ins, chat
//! monitors, and single operations.

pub mod correlate;
pub mod monitor;
pub mod oneshot;
pub mod record;
pub mod schedule;
pub mod signer;

pub use correlate::ReplyCorrelator;
pub use monitor::MonitorTask;
pub use record::{RECORD_FILE, SignRecord};
pub use schedule::Schedule;
pub use signer::{CycleOutcome, RunMode, SignTask};
