// MULTIDOM ENQUEUE / DISPATCH / TASK LIFECYCLE
//
// Runnable -> {DirectDispatch | DomainQueued} -> Running -> {Runnable | Quiescent}
//
// ENQUEUE: APPLY A PENDING MIGRATION HINT, ELSE HONOR A DIRECT DISPATCH
// FROM SELECTION, ELSE QUEUE ON THE HOME DOMAIN (FIFO OR VTIME ORDER).
// DISPATCH: LOCAL QUEUE, HOME DOMAIN, SAME-NODE SIBLINGS, THEN OTHER NODES
// WHOSE QUEUES ARE DEEP ENOUGH TO BE WORTH THE TRIP.

use log::debug;

use crate::consts::Pid;
use crate::cpumask::Cpumask;
use crate::domain::vtime_before;
use crate::dsq::DispatchQueue;
use crate::error::SchedError;
use crate::host::Host;
use crate::scheduler::Scheduler;
use crate::stats::Stat;
use crate::task::{calc_avg, update_freq, TaskCtx};

impl<H: Host> Scheduler<H> {
    pub fn on_enqueue(&self, pid: Pid) {
        let task = match self.tasks.lookup(pid) {
            Ok(task) => task,
            Err(err) => {
                self.report(0, err);
                return;
            }
        };
        let mut t = task.lock();
        let cpu = t.cpu;

        // MIGRATION REQUESTED BY THE BALANCER. CONSUMED ON FIRST SIGHT.
        let hint = self.hints.lock().remove(&pid);
        let migrated = match hint {
            Some(new_dom) if new_dom != t.dom_id => self.assign_domain(&mut t, new_dom, false),
            _ => false,
        };

        if migrated {
            self.stat(cpu, Stat::LoadBalance);
            t.dispatch_local = false;
            if let Some(kick) = self.idle.pick_any_cpu(&t.cpumask) {
                self.host.kick_cpu(kick);
            }
        } else {
            if t.dispatch_local {
                t.dispatch_local = false;
                if let Some(local) = self.local_dsqs.get(t.selected_cpu as usize) {
                    local.insert(pid);
                    t.queued = true;
                    return;
                }
            }

            // GREEDY EXECUTION LEFT US ON A FOREIGN CPU WITHOUT GOING THROUGH
            // SELECTION. WAKE A DOMESTIC CPU OR NOBODY WILL LOOK AT THE QUEUE.
            if !t.cpumask.test(t.cpu) {
                if let Some(kick) = self.idle.pick_any_cpu(&t.cpumask) {
                    self.host.kick_cpu(kick);
                }
                self.stat(cpu, Stat::Repatriate);
            }
        }

        if !self.dom_queue_insert(&mut t, cpu) {
            return;
        }

        // WAKE AN IDLE, UNSATURATED CPU ELSEWHERE TO COME STEAL THIS TASK
        if t.all_cpus {
            let kick_greedy = self.tuner.kick_greedy.snapshot();
            if let Some(kick) = self.idle.pick_idle_cpu(&kick_greedy, false) {
                self.stat(cpu, Stat::KickGreedy);
                self.host.kick_cpu(kick);
            }
        }
    }

    // QUEUE t ON ITS HOME DOMAIN (FIFO OR VTIME ORDER)
    fn dom_queue_insert(&self, t: &mut TaskCtx, cpu: u32) -> bool {
        let Some(domc) = self.domain(t.dom_id) else {
            self.report(cpu, SchedError::InvalidDomain(t.dom_id));
            return false;
        };

        if self.cfg.fifo_sched {
            domc.dsq.insert(t.pid);
        } else {
            // AN IDLE TASK MAY BANK AT MOST ONE SLICE OF BUDGET
            let vtime_now = domc.vtime_now();
            let floor = vtime_now.wrapping_sub(self.cfg.slice_ns);
            let mut vtime = t.vtime;
            if vtime_before(vtime, floor) {
                vtime = floor;
                self.stat(cpu, Stat::DlClamp);
            } else if vtime_before(vtime_now, vtime) {
                self.stat(cpu, Stat::DlPreset);
            }
            t.vtime = vtime;
            domc.dsq.insert_vtime(t.pid, vtime);
        }
        t.queued = true;
        true
    }

    // NEXT TASK FOR cpu, OR NONE TO GO IDLE
    pub fn on_dispatch(&self, cpu: u32) -> Option<Pid> {
        let (Some(local), Some(pcpu)) = (self.local_dsqs.get(cpu as usize), self.cpu_ctx(cpu)) else {
            self.report(cpu, SchedError::CpuOutOfRange(cpu));
            return None;
        };

        // DIRECT DISPATCHES WERE PLACED FOR THIS CPU ALREADY
        while let Some(pid) = local.pop() {
            if let Ok(task) = self.tasks.lookup(pid) {
                let mut t = task.lock();
                t.queued = false;
                t.cpu = cpu;
                return Some(pid);
            }
        }

        let my_dom = self.domain(pcpu.dom_id)?;
        if let Some(pid) = self.consume(&my_dom.dsq, cpu) {
            self.stat(cpu, Stat::DsqDispatch);
            return Some(pid);
        }

        if self.cfg.greedy_threshold > 0 {
            let node_doms = &pcpu.node_doms;
            let nr = node_doms.len() as u32;
            let cur = pcpu.rr_cur();
            for i in 0..nr {
                let dom = node_doms[((cur.wrapping_add(1 + i)) % nr) as usize];
                if let Some(pid) = self.consume(&self.doms[dom as usize].dsq, cpu) {
                    self.stat(cpu, Stat::GreedyLocal);
                    return Some(pid);
                }
            }
        }

        let threshold = self.cfg.greedy_threshold_x_numa;
        if threshold == 0 || self.topo.nr_nodes == 1 {
            return None;
        }

        let nr_doms = self.topo.nr_doms;
        for _ in 0..nr_doms.saturating_sub(1) {
            let dom = &self.doms[(pcpu.rr_next().wrapping_add(1) % nr_doms) as usize];
            if dom.node != my_dom.node && dom.dsq.nr_queued() >= threshold {
                if let Some(pid) = self.consume(&dom.dsq, cpu) {
                    self.stat(cpu, Stat::GreedyXnuma);
                    return Some(pid);
                }
            }
        }
        None
    }

    // POP THE FIRST ENTRY cpu MAY RUN. DEAD PIDS ARE DROPPED ON THE WAY;
    // A TASK WHOSE LOCK IS HELD ELSEWHERE IS LEFT FOR THE NEXT PASS.
    fn consume(&self, q: &DispatchQueue, cpu: u32) -> Option<Pid> {
        let runnable_here = |pid: Pid| match self.tasks.lookup(pid) {
            Ok(task) => task.try_lock().is_some_and(|t| t.allowed.test(cpu)),
            Err(_) => true,
        };
        while let Some(pid) = q.pop_where(&runnable_here) {
            if let Ok(task) = self.tasks.lookup(pid) {
                let mut t = task.lock();
                t.queued = false;
                t.cpu = cpu;
                return Some(pid);
            }
        }
        None
    }

    pub fn on_runnable(&self, pid: Pid, waker: Option<Pid>) {
        let now = self.now();
        {
            let task = match self.tasks.lookup(pid) {
                Ok(task) => task,
                Err(err) => {
                    self.report(0, err);
                    return;
                }
            };
            let mut t = task.lock();
            if t.offline {
                self.report(t.cpu, SchedError::OfflineTaskRunnable(pid));
                return;
            }
            t.task_load_adj(now, true, self.cfg.load_half_life_ns);
            self.dom_dcycle_adj(t.dom_id, t.weight, now, true);
        }

        // ONE TASK LOCK AT A TIME
        if let Some(waker) = waker.and_then(|w| self.tasks.lookup(w).ok()) {
            let mut w = waker.lock();
            if w.last_woke_at != 0 {
                w.waker_freq = update_freq(w.waker_freq, now.saturating_sub(w.last_woke_at));
            }
            w.last_woke_at = now;
        }
    }

    pub fn on_running(&self, pid: Pid, cpu: u32) {
        let task = match self.tasks.lookup(pid) {
            Ok(task) => task,
            Err(err) => {
                self.report(cpu, err);
                return;
            }
        };
        let mut t = task.lock();
        let now = self.now();
        t.running_at = now;
        t.cpu = cpu;
        if t.last_run_at != 0 {
            t.running_freq = update_freq(t.running_freq, now.saturating_sub(t.last_run_at));
        }
        t.last_run_at = now;

        let dom_id = t.dom_id;
        let Some(domc) = self.domain(dom_id) else {
            self.report(cpu, SchedError::InvalidDomain(dom_id));
            return;
        };
        if t.dom_mask & (1u64 << dom_id) == 0 {
            self.report(cpu, SchedError::DomainMaskInconsistent { pid, dom: dom_id, mask: t.dom_mask });
        }

        // THE BALANCER ONLY CONSIDERS RECENTLY ACTIVE TASKS
        domc.active.record(pid, &mut t.dom_active_pids_gen);

        if !self.cfg.fifo_sched {
            domc.advance_vtime(t.vtime);
        }
    }

    pub fn on_stopping(&self, pid: Pid, _runnable: bool) {
        let task = match self.tasks.lookup(pid) {
            Ok(task) => task,
            Err(err) => {
                self.report(0, err);
                return;
            }
        };
        let mut t = task.lock();
        let elapsed = self.now().saturating_sub(t.running_at);
        t.sum_runtime = t.sum_runtime.saturating_add(elapsed);

        if !self.cfg.fifo_sched {
            // CHARGE RUNTIME SCALED BY INVERSE WEIGHT
            let charge = elapsed.saturating_mul(100) / t.weight.max(1) as u64;
            t.vtime = t.vtime.wrapping_add(charge);
        }
    }

    pub fn on_quiescent(&self, pid: Pid) {
        let task = match self.tasks.lookup(pid) {
            Ok(task) => task,
            Err(err) => {
                self.report(0, err);
                return;
            }
        };
        let mut t = task.lock();
        let now = self.now();
        t.task_load_adj(now, false, self.cfg.load_half_life_ns);
        self.dom_dcycle_adj(t.dom_id, t.weight, now, false);

        if t.last_blocked_at != 0 {
            t.blocked_freq = update_freq(t.blocked_freq, now.saturating_sub(t.last_blocked_at));
        }
        t.last_blocked_at = now;
        t.avg_runtime = calc_avg(t.avg_runtime, t.sum_runtime);
        t.sum_runtime = 0;
    }

    pub fn on_set_weight(&self, pid: Pid, weight: u32) {
        let task = match self.tasks.lookup(pid) {
            Ok(task) => task,
            Err(err) => {
                self.report(0, err);
                return;
            }
        };
        let mut t = task.lock();
        if self.cfg.debug >= 2 {
            debug!("[{pid}]: SET_WEIGHT {} -> {weight}", t.weight);
        }
        let old_weight = t.weight;
        t.weight = weight;
        self.dcycle_reweight(&t, old_weight, self.now());
    }

    pub fn on_set_affinity(&self, pid: Pid, allowed: Cpumask) {
        let task = match self.tasks.lookup(pid) {
            Ok(task) => task,
            Err(err) => {
                self.report(0, err);
                return;
            }
        };
        let mut t = task.lock();
        let old_dom = t.dom_id;
        t.allowed = allowed;
        t.nr_cpus_allowed = allowed.weight();
        let cpu = t.cpu;
        self.task_refresh_domain(&mut t, cpu, &allowed);
        t.all_cpus = self.topo.all_cpumask().is_subset(&allowed);

        if t.queued {
            self.requeue_stranded(&mut t, old_dom);
        }
    }

    // A QUEUED TASK MUST SIT WHERE ITS CPUS LOOK. PULL IT OUT OF THE DOMAIN
    // IT LEFT, OR OUT OF A LOCAL QUEUE IT MAY NO LONGER RUN FROM.
    fn requeue_stranded(&self, t: &mut TaskCtx, old_dom: u32) {
        let pid = t.pid;
        let cpu = t.cpu;
        let left_dom = old_dom != t.dom_id && self.domain(old_dom).is_some_and(|d| d.dsq.remove(pid));
        let left_local = !left_dom
            && !t.allowed.test(t.selected_cpu)
            && self.local_dsqs.get(t.selected_cpu as usize).is_some_and(|q| q.remove(pid));
        if !left_dom && !left_local {
            return;
        }

        t.queued = false;
        if self.dom_queue_insert(t, cpu) {
            if let Some(kick) = self.idle.pick_any_cpu(&t.cpumask) {
                self.host.kick_cpu(kick);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedConfig;
    use crate::host::ManualHost;
    use crate::task::TaskInit;
    use crate::topology::TopologyInput;

    fn sched(cfg: SchedConfig) -> Scheduler<ManualHost> {
        Scheduler::init(TopologyInput::uniform(4, 1, 1), cfg, ManualHost::new(1_000_000_000)).unwrap()
    }

    #[test]
    fn enqueue_then_dispatch_from_domain() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        s.on_runnable(1, None);
        s.on_enqueue(1);
        assert_eq!(s.dom_queued(0), 1);
        assert_eq!(s.on_dispatch(2), Some(1));
        assert_eq!(s.read_stats().get(Stat::DsqDispatch), 1);
        assert!(!s.task(1).unwrap().queued);
        assert_eq!(s.on_dispatch(2), None);
    }

    #[test]
    fn direct_dispatch_goes_to_local_queue() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        {
            let task = s.tasks.lookup(1).unwrap();
            let mut t = task.lock();
            t.dispatch_local = true;
            t.selected_cpu = 3;
        }
        s.on_enqueue(1);
        assert_eq!(s.local_queued(3), 1);
        assert_eq!(s.dom_queued(0), 0);
        assert_eq!(s.on_dispatch(3), Some(1));
        assert!(!s.task(1).unwrap().dispatch_local);
    }

    #[test]
    fn vtime_clamped_to_one_slice() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        s.domain(0).unwrap().advance_vtime(100_000_000);
        s.on_enqueue(1);
        assert_eq!(s.task(1).unwrap().vtime, 100_000_000 - 20_000_000);
        assert_eq!(s.read_stats().get(Stat::DlClamp), 1);
    }

    #[test]
    fn vtime_ahead_counts_preset() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        s.tasks.lookup(1).unwrap().lock().vtime = 5_000;
        s.on_enqueue(1);
        assert_eq!(s.task(1).unwrap().vtime, 5_000);
        assert_eq!(s.read_stats().get(Stat::DlPreset), 1);
    }

    #[test]
    fn stopping_charges_inverse_weight() {
        let s = sched(SchedConfig::default());
        let mut init = TaskInit::new(Cpumask::full(4));
        init.weight = 200;
        assert!(s.on_task_created(1, init));
        s.on_running(1, 0);
        s.host().advance(1_000_000);
        s.on_stopping(1, false);
        let t = s.task(1).unwrap();
        assert_eq!(t.vtime, 500_000);
        assert_eq!(t.sum_runtime, 1_000_000);
    }

    #[test]
    fn fifo_mode_leaves_vtime_alone() {
        let s = sched(SchedConfig { fifo_sched: true, ..SchedConfig::default() });
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        s.on_running(1, 0);
        s.host().advance(1_000_000);
        s.on_stopping(1, false);
        assert_eq!(s.task(1).unwrap().vtime, 0);
        assert_eq!(s.domain(0).unwrap().vtime_now(), 0);
    }

    #[test]
    fn running_advances_domain_clock_and_records_active() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        s.tasks.lookup(1).unwrap().lock().vtime = 777;
        s.on_running(1, 1);
        assert_eq!(s.domain(0).unwrap().vtime_now(), 777);
        let snap = s.domain(0).unwrap().active.snapshot();
        assert_eq!(snap.pids, vec![1]);
    }

    #[test]
    fn quiescent_folds_runtime() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        s.on_runnable(1, None);
        s.on_running(1, 0);
        s.host().advance(4_000_000);
        s.on_stopping(1, false);
        s.on_quiescent(1);
        let t = s.task(1).unwrap();
        assert_eq!(t.avg_runtime, 1_000_000);
        assert_eq!(t.sum_runtime, 0);
        assert!(!t.runnable);
        assert_eq!(s.domain(0).unwrap().bucket(1).lock().dcycle, 0);
    }

    #[test]
    fn offline_task_runnable_is_violation() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        s.tasks.lookup(1).unwrap().lock().offline = true;
        s.on_runnable(1, None);
        assert!(s.exit_info().unwrap().reason.contains("offline"));
        assert!(!s.task(1).unwrap().runnable);
    }

    #[test]
    fn waker_frequency_tracks_wakeups() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        assert!(s.on_task_created(2, TaskInit::new(Cpumask::full(4))));
        for _ in 0..3 {
            s.host().advance(10_000_000);
            s.on_runnable(1, Some(2));
            s.on_quiescent(1);
        }
        assert!(s.task(2).unwrap().waker_freq > 0);
    }

    #[test]
    fn destroyed_task_is_skipped_at_dispatch() {
        let s = sched(SchedConfig::default());
        assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(4))));
        assert!(s.on_task_created(2, TaskInit::new(Cpumask::full(4))));
        s.on_enqueue(1);
        s.on_enqueue(2);
        s.on_task_destroyed(1);
        assert_eq!(s.on_dispatch(0), Some(2));
        assert_eq!(s.on_dispatch(0), None);
    }
}
