//! Common types shared between the session client and the test dispatcher

pub mod execution;
pub mod messages;
pub mod ssh;
pub mod testcase;

pub use execution::{ExecutionResult, FailureReason};
pub use messages::{OutcomeStatus, WorkerAssignment, WorkerOutcome};
pub use ssh::{expand_home, HostKeyVerification, SshAuth, SshConfig};
pub use testcase::{FileTransfer, Testcase};
