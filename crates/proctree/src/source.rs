use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sysinfo::{ProcessRefreshKind, RefreshKind, System, ThreadKind};

use crate::{BoxError, Pid};

/// One entry of the flat process listing returned by a [`ProcessSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: Pid,
    /// Parent pid, `0` when the process has no parent.
    pub ppid: Pid,
    /// Executable name, without the directory path.
    pub executable: String,
}

impl ProcessRecord {
    pub fn new(pid: Pid, ppid: Pid, executable: impl Into<String>) -> Self {
        Self {
            pid,
            ppid,
            executable: executable.into(),
        }
    }
}

/// Supplies the current flat list of OS processes.
///
/// The call may block; the returned list has no particular order.
pub trait ProcessSource: Send + Sync {
    fn processes(&self) -> Result<Vec<ProcessRecord>, BoxError>;
}

impl<F> ProcessSource for F
where
    F: Fn() -> Result<Vec<ProcessRecord>, BoxError> + Send + Sync,
{
    fn processes(&self) -> Result<Vec<ProcessRecord>, BoxError> {
        self()
    }
}

/// Enumerates processes with `sysinfo`. Userland threads are not reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoSource;

impl ProcessSource for SysinfoSource {
    fn processes(&self) -> Result<Vec<ProcessRecord>, BoxError> {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );

        let records = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind() != Some(ThreadKind::Userland))
            .filter_map(|(pid, process)| {
                sysinfo_record(
                    pid.as_u32(),
                    process.parent().map(|ppid| ppid.as_u32()),
                    process.name().to_string_lossy().into_owned(),
                )
            })
            .collect();

        Ok(records)
    }
}

/// `None` when a pid or parent pid does not fit in [`Pid`].
fn sysinfo_record(pid: u32, ppid: Option<u32>, executable: String) -> Option<ProcessRecord> {
    let pid = Pid::try_from(pid).ok()?;
    let ppid = match ppid {
        Some(ppid) => Pid::try_from(ppid).ok()?,
        None => 0,
    };
    Some(ProcessRecord {
        pid,
        ppid,
        executable,
    })
}

/// Enumerates processes by reading `/proc/<pid>/stat`.
///
/// Processes that exit while the listing is in progress are skipped.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsSource;

#[cfg(target_os = "linux")]
impl ProcessSource for ProcfsSource {
    fn processes(&self) -> Result<Vec<ProcessRecord>, BoxError> {
        let mut records = Vec::new();
        for process in procfs::process::all_processes()? {
            let Ok(stat) = process.and_then(|process| process.stat()) else {
                continue;
            };
            records.push(ProcessRecord {
                pid: stat.pid,
                ppid: stat.ppid,
                executable: stat.comm,
            });
        }
        Ok(records)
    }
}

/// Serves a fixed, replaceable list of records, e.g. a snapshot saved earlier.
#[derive(Debug, Default)]
pub struct StaticSource {
    records: Mutex<Vec<ProcessRecord>>,
}

impl StaticSource {
    pub fn new(records: Vec<ProcessRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Replace the records served by the next enumerations.
    pub fn set(&self, records: Vec<ProcessRecord>) {
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records;
    }
}

impl ProcessSource for StaticSource {
    fn processes(&self) -> Result<Vec<ProcessRecord>, BoxError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source_serves_latest_records() {
        let source = StaticSource::new(vec![ProcessRecord::new(1, 0, "init")]);
        assert_eq!(source.processes().unwrap().len(), 1);

        source.set(vec![
            ProcessRecord::new(1, 0, "init"),
            ProcessRecord::new(2, 1, "sh"),
        ]);
        assert_eq!(
            source.processes().unwrap(),
            vec![ProcessRecord::new(1, 0, "init"), ProcessRecord::new(2, 1, "sh")]
        );
    }

    #[test]
    fn test_closure_source() {
        let source = || -> Result<Vec<ProcessRecord>, BoxError> { Err("no access".into()) };
        let err = source.processes().unwrap_err();
        assert_eq!(err.to_string(), "no access");
    }

    #[test]
    fn test_sysinfo_record_skips_out_of_range_pids() {
        assert_eq!(
            sysinfo_record(42, Some(1), "sh".to_string()),
            Some(ProcessRecord::new(42, 1, "sh"))
        );
        assert_eq!(
            sysinfo_record(1, None, "init".to_string()),
            Some(ProcessRecord::new(1, 0, "init"))
        );
        assert_eq!(sysinfo_record(u32::MAX, Some(1), "x".to_string()), None);
        assert_eq!(sysinfo_record(42, Some(u32::MAX), "x".to_string()), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_sysinfo_source_lists_current_process() {
        let pid = std::process::id() as Pid;
        let records = SysinfoSource.processes().unwrap();
        let me = records.iter().find(|r| r.pid == pid).unwrap();
        assert_eq!(me.ppid, std::os::unix::process::parent_id() as Pid);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_procfs_source_lists_current_process() {
        let pid = std::process::id() as Pid;
        let records = ProcfsSource.processes().unwrap();
        let me = records.iter().find(|r| r.pid == pid).unwrap();
        assert_eq!(me.ppid, std::os::unix::process::parent_id() as Pid);
        assert!(!me.executable.is_empty());
    }
}
