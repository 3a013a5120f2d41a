// MULTIDOM BALANCER INTERFACE
// WHAT AN EXTERNAL LOAD BALANCER READS FROM THE CORE AND WRITES INTO IT.
// THE CORE NEVER COMPUTES GLOBAL IMBALANCE; IT MEASURES AND OBEYS.

use crate::consts::Pid;
use crate::cpumask::Cpumask;
use crate::domain::{ActiveSnapshot, DomainLoad};
use crate::error::SchedError;
use crate::host::Host;
use crate::scheduler::Scheduler;

// PER-TASK INPUT FOR VICTIM SELECTION
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskLoad {
    pub pid: Pid,
    pub dom_id: u32,
    pub weight: u32,
    pub dom_mask: u64,
    pub preferred_dom_mask: u64,
    pub all_cpus: bool,
    // FRACTION OF TIME RUNNABLE, FIXED POINT (RAVG_1 == ALWAYS)
    pub dcycle: u64,
    pub running_freq: u64,
    pub blocked_freq: u64,
    pub waker_freq: u64,
    pub avg_runtime: u64,
}

impl<H: Host> Scheduler<H> {
    pub fn set_migration_hint(&self, pid: Pid, dom: u32) -> Result<(), SchedError> {
        if dom >= self.topo.nr_doms {
            return Err(SchedError::InvalidDomain(dom));
        }
        self.hints.lock().insert(pid, dom);
        Ok(())
    }

    pub fn clear_migration_hints(&self) {
        self.hints.lock().clear();
    }

    pub fn pending_hints(&self) -> usize {
        self.hints.lock().len()
    }

    pub fn dom_dcycle_snapshot(&self) -> Vec<DomainLoad> {
        let now = self.now();
        let half_life = self.cfg.load_half_life_ns;
        self.doms.iter().map(|d| d.load(now, half_life)).collect()
    }

    // PIDS ACTIVE IN dom SINCE THE LAST READ. STARTS A NEW GENERATION.
    pub fn read_active_tasks(&self, dom: u32) -> Option<ActiveSnapshot> {
        self.domain(dom).map(|d| d.active.snapshot())
    }

    pub fn task_load(&self, pid: Pid) -> Option<TaskLoad> {
        let task = self.tasks.lookup(pid).ok()?;
        let t = task.lock();
        Some(TaskLoad {
            pid,
            dom_id: t.dom_id,
            weight: t.weight,
            dom_mask: t.dom_mask,
            preferred_dom_mask: t.preferred_dom_mask,
            all_cpus: t.all_cpus,
            dcycle: t.dcyc_rd.read(self.now(), self.cfg.load_half_life_ns),
            running_freq: t.running_freq,
            blocked_freq: t.blocked_freq,
            waker_freq: t.waker_freq,
            avg_runtime: t.avg_runtime,
        })
    }

    // RETURNS THE GENERATION THE CORE WILL PICK UP
    pub fn write_tune_input(&self, direct_greedy: Cpumask, kick_greedy: Cpumask) -> u64 {
        self.tuner.write(direct_greedy, kick_greedy)
    }
}
