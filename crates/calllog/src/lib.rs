//! Call log billing built on `chunkflow-batch`.
//!
//! Parses a call log file, creates one bill per calling subscriber, optionally
//! waits for a manual approval of the file and then sends the bills.

pub mod bill;
pub mod call;
pub mod job;
pub mod store;

pub use bill::Bill;
pub use call::PhoneCall;
pub use job::{JOB_NAME, call_log_parameters, parse_call_log_job};
pub use store::{BillStore, CallLogStores, CallUsage, PhoneCallStore};
