// MULTIDOM ERRORS AND EXIT INFO
//
// SETUP FAILURES RETURN Err FROM Scheduler::init.
// HOT-PATH INVARIANT VIOLATIONS ARE SchedError VALUES HANDED TO
// Scheduler::report(): LOGGED, COUNTED, RECORDED HERE. THE CALLER THEN
// FALLS BACK TO A SAFE DECISION AND KEEPS GOING.

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::ConfigError;
use crate::consts::{Pid, ECODE_RESTART};
use crate::topology::TopologyError;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedError {
    #[error("task context missing for pid {0}")]
    TaskContextMissing(Pid),
    #[error("invalid domain {0}")]
    InvalidDomain(u32),
    #[error("cpu {0} out of range")]
    CpuOutOfRange(u32),
    #[error("dcycle underflow in domain {dom} bucket {bucket}")]
    DcycleUnderflow { dom: u32, bucket: usize },
    #[error("offline task {0} became runnable")]
    OfflineTaskRunnable(Pid),
    #[error("failed to assign pid {pid} to domain {dom}")]
    DomainAssignFailed { pid: Pid, dom: u32 },
    #[error("pid {pid} running in domain {dom} outside its dom_mask {mask:#x}")]
    DomainMaskInconsistent { pid: Pid, dom: u32, mask: u64 },
    #[error("cpu {cpu} went {}, restarting", hotplug_dir(.online))]
    Hotplug { cpu: u32, online: bool },
}

fn hotplug_dir(online: &bool) -> &'static str {
    if *online {
        "online"
    } else {
        "offline"
    }
}

impl SchedError {
    // HOT-PLUG IS THE ONLY EXIT THAT ASKS THE OWNER TO REBUILD
    pub fn exit_code(&self) -> u64 {
        match self {
            SchedError::Hotplug { .. } => ECODE_RESTART,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    // INVARIANT VIOLATION INSIDE THE CORE
    Error,
    // TOPOLOGY CHANGED UNDER US
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    pub kind: ExitKind,
    pub code: u64,
    pub reason: String,
}

impl ExitRecord {
    pub fn should_restart(&self) -> bool {
        self.code & ECODE_RESTART != 0
    }
}

// FIRST RECORD WINS. LATER ERRORS ARE LOGGED BUT DO NOT OVERWRITE.
#[derive(Debug, Default)]
pub struct ExitInfo {
    record: Mutex<Option<ExitRecord>>,
}

impl ExitInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, err: &SchedError) {
        let mut slot = self.record.lock();
        if slot.is_some() {
            return;
        }
        let code = err.exit_code();
        let kind = if code & ECODE_RESTART != 0 {
            ExitKind::Restart
        } else {
            ExitKind::Error
        };
        *slot = Some(ExitRecord { kind, code, reason: err.to_string() });
    }

    pub fn exited(&self) -> bool {
        self.record.lock().is_some()
    }

    pub fn get(&self) -> Option<ExitRecord> {
        self.record.lock().clone()
    }
}
