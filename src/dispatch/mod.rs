//! 多机测试分发
//!
//! master 与 worker 之间通过分配通道和结果通道通信

pub mod master;
pub mod pool;
pub mod report;
pub mod runner;
pub mod worker;

pub use pool::WorkerPool;
pub use report::RunReport;
pub use runner::TestcaseRunner;
pub use worker::Worker;
