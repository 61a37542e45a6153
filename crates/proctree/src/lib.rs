//! In-memory snapshot of the operating system process tree.
//!
//! A [`ProcTree`] session enumerates the process table through a
//! [`ProcessSource`], reconciles it into a tree of [`Process`] nodes and keeps
//! two views of it: the absolute OS tree, and the included view selected by a
//! [`Config`] (configured roots, ancestor inclusion, kernel-thread exclusion).
//! Calling [`ProcTree::update`] refreshes the snapshot in place while
//! preserving node identity.

mod config;
mod error;
mod process;
mod source;
mod tree;

pub use config::{Config, ConfigOption};
pub use error::{BoxError, Error, Result};
pub use process::Process;
#[cfg(target_os = "linux")]
pub use source::ProcfsSource;
pub use source::{ProcessRecord, ProcessSource, StaticSource, SysinfoSource};
pub use tree::ProcTree;

/// Operating system process id. `0` is never a real process and stands for
/// "no parent" in [`ProcessRecord::ppid`].
pub type Pid = i32;

/// Process id of the kernel thread daemon; its subtree holds the kernel threads.
pub const KTHREAD_PID: Pid = 2;
