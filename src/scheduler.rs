// MULTIDOM SCHEDULER
// OWNS EVERY PIECE OF CORE STATE AND EXPOSES THE SUBSTRATE CALLBACKS.
// THE DECISION LOGIC LIVES IN assign/dcycle/select/enqueue/tune AS
// impl BLOCKS ON THIS TYPE.
//
// LOCK ORDER: TASK -> BUCKET. NEVER TWO BUCKET LOCKS, NEVER TWO TASKS.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam::utils::CachePadded;
use log::{debug, error, info};
use parking_lot::Mutex;

use crate::config::SchedConfig;
use crate::consts::{Pid, MAX_CPUS, OFFLINE_CPU_DOM};
use crate::cpumask::Cpumask;
use crate::domain::Domain;
use crate::dsq::DispatchQueue;
use crate::error::{ExitInfo, ExitRecord, InitError, SchedError};
use crate::host::Host;
use crate::idle::IdleTracker;
use crate::stats::{PerCpuStats, Stat, StatsSnapshot};
use crate::task::{TaskCtx, TaskInit, TaskStore, WakeCtx, WakeFlags};
use crate::topology::{Topology, TopologyInput};
use crate::tune::Tuner;

pub struct CpuCtx {
    // OFFLINE_CPU_DOM FOR CPUS OUTSIDE EVERY DOMAIN
    pub dom_id: u32,
    pub dom_rr_cur: AtomicU32,
    // OTHER DOMAINS ON THIS CPU'S NODE
    pub node_doms: Vec<u32>,
}

impl CpuCtx {
    // POST-INCREMENT THE ROUND-ROBIN CURSOR
    pub fn rr_next(&self) -> u32 {
        self.dom_rr_cur.fetch_add(1, Ordering::Relaxed)
    }

    pub fn rr_cur(&self) -> u32 {
        self.dom_rr_cur.load(Ordering::Relaxed)
    }
}

pub struct Scheduler<H: Host> {
    pub(crate) cfg: SchedConfig,
    pub(crate) topo: Topology,
    pub(crate) doms: Vec<Domain>,
    pub(crate) cpus: Vec<CachePadded<CpuCtx>>,
    pub(crate) local_dsqs: Vec<DispatchQueue>,
    pub(crate) tasks: TaskStore,
    pub(crate) idle: IdleTracker,
    pub(crate) stats: PerCpuStats,
    pub(crate) tuner: Tuner,
    // MIGRATION HINTS FROM THE BALANCER: PID -> TARGET DOMAIN
    pub(crate) hints: Mutex<HashMap<Pid, u32>>,
    pub(crate) exit: ExitInfo,
    pub(crate) host: H,
}

impl<H: Host> Scheduler<H> {
    pub fn init(input: TopologyInput, cfg: SchedConfig, host: H) -> Result<Self, InitError> {
        cfg.validate()?;
        let topo = Topology::build(input)?;

        let doms: Vec<Domain> = (0..topo.nr_doms)
            .map(|d| {
                let node = topo.dom_node(d).unwrap_or(0);
                let cpumask = topo.dom_cpumask(d).copied().unwrap_or_default();
                let node_cpumask = topo.node_cpumask(node).copied().unwrap_or_default();
                Domain::new(d, node, cpumask, node_cpumask)
            })
            .collect();

        let cpus: Vec<CachePadded<CpuCtx>> = (0..topo.nr_cpus)
            .map(|cpu| {
                let dom_id = topo.cpu_to_dom(cpu);
                let node_doms = if dom_id == OFFLINE_CPU_DOM {
                    Vec::new()
                } else {
                    topo.node_sibling_doms(cpu)
                };
                CachePadded::new(CpuCtx {
                    dom_id,
                    dom_rr_cur: AtomicU32::new(cpu),
                    node_doms,
                })
            })
            .collect();

        let siblings = (0..topo.nr_cpus)
            .map(|cpu| topo.core_siblings(cpu).copied().unwrap_or_else(|| Cpumask::from_cpus([cpu])))
            .collect();

        info!(
            "init: {} cpus, {} domains, {} nodes, fifo={} greedy_threshold={} x_numa={}",
            topo.nr_cpus,
            topo.nr_doms,
            topo.nr_nodes,
            cfg.fifo_sched,
            cfg.greedy_threshold,
            cfg.greedy_threshold_x_numa
        );
        for d in &doms {
            debug!("dom{} node{} cpus={}", d.id, d.node, d.cpumask);
        }

        Ok(Self {
            local_dsqs: (0..topo.nr_cpus).map(|_| DispatchQueue::new()).collect(),
            stats: PerCpuStats::new(topo.nr_cpus),
            idle: IdleTracker::new(siblings),
            tuner: Tuner::new(),
            tasks: TaskStore::new(),
            hints: Mutex::new(HashMap::new()),
            exit: ExitInfo::new(),
            cfg,
            topo,
            doms,
            cpus,
            host,
        })
    }

    pub fn config(&self) -> &SchedConfig {
        &self.cfg
    }

    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn domain(&self, dom: u32) -> Option<&Domain> {
        self.doms.get(dom as usize)
    }

    pub fn cpu_ctx(&self, cpu: u32) -> Option<&CpuCtx> {
        self.cpus.get(cpu as usize).map(|c| &**c)
    }

    pub fn nr_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn now(&self) -> u64 {
        self.host.now_ns()
    }

    pub(crate) fn stat(&self, cpu: u32, stat: Stat) {
        self.stats.inc(cpu, stat);
    }

    // THE ONE INVARIANT-VIOLATION PATH: LOG, COUNT, RECORD. CALLERS FALL BACK.
    pub(crate) fn report(&self, cpu: u32, err: SchedError) {
        error!("cpu{cpu}: {err}");
        if matches!(err, SchedError::TaskContextMissing(_)) {
            self.stat(cpu, Stat::TaskGetErr);
        }
        self.exit.record(&err);
    }

    pub fn exited(&self) -> bool {
        self.exit.exited()
    }

    pub fn exit_info(&self) -> Option<ExitRecord> {
        self.exit.get()
    }

    pub fn read_stats(&self) -> StatsSnapshot {
        self.stats.read()
    }

    // SNAPSHOT OF A TASK'S CONTEXT (FOR TESTS AND THE BALANCER)
    pub fn task(&self, pid: Pid) -> Option<TaskCtx> {
        self.tasks.lookup(pid).ok().map(|t| t.lock().clone())
    }

    pub fn local_queued(&self, cpu: u32) -> u32 {
        self.local_dsqs.get(cpu as usize).map_or(0, |q| q.nr_queued())
    }

    pub fn dom_queued(&self, dom: u32) -> u32 {
        self.domain(dom).map_or(0, |d| d.dsq.nr_queued())
    }

    // ---- SUBSTRATE CALLBACKS ----

    // RETURNS FALSE WHEN THE TASK IS NOT MANAGED BY THIS SCHEDULER
    pub fn on_task_created(&self, pid: Pid, init: TaskInit) -> bool {
        if self.cfg.switch_partial && !init.opted_in {
            return false;
        }
        let calling_cpu = init.cpu;
        let task = self.tasks.create(TaskCtx::new(pid, &init));
        if self.cfg.debug >= 2 {
            debug!("[{pid}]: INIT (weight {})", init.weight);
        }

        let mut t = task.lock();
        self.task_pick_and_set_domain(&mut t, calling_cpu, &init.allowed, true);
        t.all_cpus = self.topo.all_cpumask().is_subset(&init.allowed);
        true
    }

    pub fn on_task_destroyed(&self, pid: Pid) {
        let Some(task) = self.tasks.remove(pid) else {
            return;
        };
        // DROP ANY HINT; A QUEUED ENTRY IS SKIPPED LAZILY AT DISPATCH
        self.hints.lock().remove(&pid);
        let mut t = task.lock();
        if t.runnable {
            let now = self.now();
            t.task_load_adj(now, false, self.cfg.load_half_life_ns);
            if t.dom_id < self.topo.nr_doms {
                self.dom_dcycle_adj(t.dom_id, t.weight, now, false);
            }
        }
    }

    pub fn on_wake(&self, pid: Pid, prev_cpu: u32, wake_flags: WakeFlags, waker: WakeCtx) -> u32 {
        self.select_cpu(pid, prev_cpu, wake_flags, waker)
    }

    pub fn on_cpu_online(&self, cpu: u32) {
        self.report(cpu, SchedError::Hotplug { cpu, online: true });
    }

    pub fn on_cpu_offline(&self, cpu: u32) {
        self.report(cpu, SchedError::Hotplug { cpu, online: false });
    }

    pub fn set_cpu_idle(&self, cpu: u32, idle: bool) {
        if cpu as usize >= MAX_CPUS || cpu >= self.topo.nr_cpus {
            self.report(cpu, SchedError::CpuOutOfRange(cpu));
            return;
        }
        self.idle.set_cpu_idle(cpu, idle);
    }

    pub fn idle_mask(&self) -> Cpumask {
        self.idle.idle_mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;

    fn sched(nr_cpus: u32, nr_doms: u32, doms_per_node: u32) -> Scheduler<ManualHost> {
        Scheduler::init(
            TopologyInput::uniform(nr_cpus, nr_doms, doms_per_node),
            SchedConfig::default(),
            ManualHost::new(1_000_000),
        )
        .unwrap()
    }

    #[test]
    fn cpu_contexts_follow_topology() {
        let s = sched(8, 4, 2);
        let c = s.cpu_ctx(5).unwrap();
        assert_eq!(c.dom_id, 2);
        assert_eq!(c.node_doms, vec![3]);
        assert_eq!(c.rr_cur(), 5);
    }

    #[test]
    fn bad_config_fails_init() {
        let cfg = SchedConfig { load_half_life_ns: 0, ..SchedConfig::default() };
        let res = Scheduler::init(TopologyInput::uniform(4, 1, 1), cfg, ManualHost::new(0));
        assert!(matches!(res, Err(InitError::Config(_))));
    }

    #[test]
    fn hotplug_requests_restart() {
        let s = sched(4, 1, 1);
        assert!(!s.exited());
        s.on_cpu_offline(2);
        let rec = s.exit_info().unwrap();
        assert!(rec.should_restart());
    }

    #[test]
    fn switch_partial_skips_unopted_tasks() {
        let cfg = SchedConfig { switch_partial: true, ..SchedConfig::default() };
        let s = Scheduler::init(TopologyInput::uniform(4, 1, 1), cfg, ManualHost::new(0)).unwrap();
        let mut init = TaskInit::new(Cpumask::full(4));
        init.opted_in = false;
        assert!(!s.on_task_created(1, init.clone()));
        init.opted_in = true;
        assert!(s.on_task_created(2, init));
        assert_eq!(s.nr_tasks(), 1);
    }

    #[test]
    fn idle_cpu_out_of_range_is_reported() {
        let s = sched(4, 1, 1);
        s.set_cpu_idle(9, true);
        assert!(s.exited());
    }
}
