// MULTIDOM TASK CONTEXTS
// PER-TASK SCHEDULING STATE, KEYED BY PID. EACH CONTEXT HAS ITS OWN MUTEX;
// THE SUBSTRATE NEVER RUNS TWO CALLBACKS FOR THE SAME TASK AT ONCE, SO THE
// LOCK IS UNCONTENDED EXCEPT AGAINST BALANCER READS.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::consts::{Pid, DL_FREQ_FT_MAX, FREQ_WINDOW_NS, LB_DEFAULT_WEIGHT, NO_DOM_FOUND};
use crate::cpumask::Cpumask;
use crate::error::SchedError;
use crate::ravg::RavgData;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskFlags(pub u32);

impl TaskFlags {
    pub const KTHREAD: TaskFlags = TaskFlags(1 << 0);
    pub const WQ_WORKER: TaskFlags = TaskFlags(1 << 1);
    pub const EXITING: TaskFlags = TaskFlags(1 << 2);

    pub fn contains(self, other: TaskFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TaskFlags {
    type Output = TaskFlags;

    fn bitor(self, rhs: TaskFlags) -> TaskFlags {
        TaskFlags(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WakeFlags(pub u64);

impl WakeFlags {
    pub const NONE: WakeFlags = WakeFlags(0);
    // WAKER IS ABOUT TO SLEEP; WAKEE MAY TAKE ITS CPU
    pub const SYNC: WakeFlags = WakeFlags(1 << 0);

    pub fn contains(self, other: WakeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

// WHO IS DOING THE WAKING
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WakeCtx {
    pub waker_cpu: u32,
    pub waker_exiting: bool,
}

// WHAT THE SUBSTRATE KNOWS ABOUT A NEW TASK
#[derive(Clone, Debug)]
pub struct TaskInit {
    pub weight: u32,
    pub allowed: Cpumask,
    pub flags: TaskFlags,
    // CPU THE TASK STARTS ON
    pub cpu: u32,
    // OPTED IN TO THIS SCHEDULER (ONLY CONSULTED IN switch_partial MODE)
    pub opted_in: bool,
}

impl TaskInit {
    pub fn new(allowed: Cpumask) -> Self {
        let cpu = allowed.first().unwrap_or(0);
        Self {
            weight: LB_DEFAULT_WEIGHT,
            allowed,
            flags: TaskFlags::default(),
            cpu,
            opted_in: true,
        }
    }
}

// old*3/4 + new/4
pub fn calc_avg(old: u64, new: u64) -> u64 {
    (old - (old >> 2)) + (new >> 2)
}

// EVENTS PER FREQ_WINDOW_NS, SMOOTHED
pub fn update_freq(freq: u64, interval: u64) -> u64 {
    let new_freq = FREQ_WINDOW_NS / interval.max(1);
    calc_avg(freq, new_freq).min(DL_FREQ_FT_MAX)
}

#[derive(Clone, Debug)]
pub struct TaskCtx {
    pub pid: Pid,
    pub dom_id: u32,
    // DOMAINS REACHABLE UNDER THE CURRENT AFFINITY
    pub dom_mask: u64,
    // REACHABLE DOMAINS ON THE SAME NODE AS dom_id
    pub preferred_dom_mask: u64,
    pub allowed: Cpumask,
    pub nr_cpus_allowed: u32,
    // dom_id's CPUS INTERSECTED WITH allowed
    pub cpumask: Cpumask,
    pub weight: u32,
    pub vtime: u64,

    pub runnable: bool,
    pub queued: bool,
    // CPU THE TASK LAST RAN OR WAS PLACED ON
    pub cpu: u32,
    // TARGET OF A DIRECT DISPATCH
    pub selected_cpu: u32,
    pub dispatch_local: bool,
    pub all_cpus: bool,
    pub offline: bool,
    pub is_kthread: bool,
    pub is_kworker: bool,

    pub dom_active_pids_gen: u64,
    pub dcyc_rd: RavgData,

    pub running_at: u64,
    pub sum_runtime: u64,
    pub avg_runtime: u64,
    pub last_run_at: u64,
    pub running_freq: u64,
    pub last_blocked_at: u64,
    pub blocked_freq: u64,
    pub last_woke_at: u64,
    pub waker_freq: u64,
}

impl TaskCtx {
    pub fn new(pid: Pid, init: &TaskInit) -> Self {
        Self {
            pid,
            dom_id: NO_DOM_FOUND,
            dom_mask: 0,
            preferred_dom_mask: 0,
            allowed: init.allowed,
            nr_cpus_allowed: init.allowed.weight(),
            cpumask: Cpumask::new(),
            weight: init.weight,
            vtime: 0,
            runnable: false,
            queued: false,
            cpu: init.cpu,
            selected_cpu: init.cpu,
            dispatch_local: false,
            all_cpus: false,
            offline: false,
            is_kthread: init.flags.contains(TaskFlags::KTHREAD),
            is_kworker: init.flags.contains(TaskFlags::WQ_WORKER),
            dom_active_pids_gen: u64::MAX,
            dcyc_rd: RavgData::default(),
            running_at: 0,
            sum_runtime: 0,
            avg_runtime: 0,
            last_run_at: 0,
            running_freq: 0,
            last_blocked_at: 0,
            blocked_freq: 0,
            last_woke_at: 0,
            waker_freq: 0,
        }
    }

    pub fn task_load_adj(&mut self, now: u64, runnable: bool, half_life: u64) {
        self.runnable = runnable;
        self.dcyc_rd.accumulate(runnable as u64, now, half_life);
    }
}

pub type TaskRef = Arc<Mutex<TaskCtx>>;

#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<Pid, TaskRef>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    // REPLACES A STALE ENTRY LEFT BY A DESTROY THAT NEVER ARRIVED
    pub fn create(&self, ctx: TaskCtx) -> TaskRef {
        let pid = ctx.pid;
        let task = Arc::new(Mutex::new(ctx));
        self.tasks.write().insert(pid, Arc::clone(&task));
        task
    }

    pub fn lookup(&self, pid: Pid) -> Result<TaskRef, SchedError> {
        self.tasks
            .read()
            .get(&pid)
            .cloned()
            .ok_or(SchedError::TaskContextMissing(pid))
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.tasks.read().contains_key(&pid)
    }

    pub fn remove(&self, pid: Pid) -> Option<TaskRef> {
        self.tasks.write().remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.tasks.read().keys().copied().collect();
        pids.sort_unstable();
        pids
    }
}
