// MULTIDOM CPU SELECTION
// RUNS AT WAKEUP. PICKS A CPU FOR THE TASK AND, WHEN THAT CPU WAS CLAIMED
// IDLE (OR THE TASK IS PINNED), MARKS THE TASK FOR DIRECT DISPATCH SO
// ENQUEUE SKIPS THE DOMAIN QUEUE.
//
// ORDER (FIRST MATCH WINS):
//   1. PINNED               SINGLE ALLOWED CPU
//   2. WAKE_SYNC            WAKER'S CPU, IF THE DOMAIN HAS IDLE CAPACITY
//   3. PREV_IDLE            PREV CPU, DOMESTIC, WHOLE CORE IDLE
//   4. GREEDY_IDLE          PREV CPU, FOREIGN BUT DIRECT-GREEDY, CORE IDLE
//   5. DIRECT_DISPATCH      IDLE CORE IN THE DOMAIN
//   6. DIRECT_DISPATCH      PREV CPU, DOMESTIC, IDLE ITSELF
//   7. DIRECT_DISPATCH      ANY IDLE CPU IN THE DOMAIN
//   8. DIRECT_GREEDY[_FAR]  IDLE CPUS IN UNDER-UTILIZED DOMAINS
//   9. FALLBACK             PREV IF DOMESTIC, ELSE ANY DOMESTIC CPU; QUEUE

use crate::consts::Pid;
use crate::cpumask::Cpumask;
use crate::host::Host;
use crate::scheduler::Scheduler;
use crate::stats::Stat;
use crate::task::{TaskCtx, WakeCtx, WakeFlags};

struct Pick {
    cpu: u32,
    direct: bool,
}

impl Pick {
    fn direct(cpu: u32) -> Self {
        Self { cpu, direct: true }
    }

    fn queue(cpu: u32) -> Self {
        Self { cpu, direct: false }
    }
}

impl<H: Host> Scheduler<H> {
    pub fn select_cpu(&self, pid: Pid, prev_cpu: u32, wake_flags: WakeFlags, waker: WakeCtx) -> u32 {
        self.refresh_tune_params();

        let task = match self.tasks.lookup(pid) {
            Ok(task) => task,
            Err(err) => {
                self.report(waker.waker_cpu, err);
                return prev_cpu;
            }
        };
        let mut t = task.lock();

        let pick = self.pick_cpu(&t, prev_cpu, wake_flags, waker);
        t.cpu = pick.cpu;
        if pick.direct {
            t.dispatch_local = true;
            t.selected_cpu = pick.cpu;
        }
        pick.cpu
    }

    fn pick_cpu(&self, t: &TaskCtx, prev_cpu: u32, wake_flags: WakeFlags, waker: WakeCtx) -> Pick {
        let stat_cpu = waker.waker_cpu;

        if t.nr_cpus_allowed == 1 {
            let cpu = t.allowed.first().unwrap_or(prev_cpu);
            if self.cfg.kthreads_local && t.is_kthread {
                self.stat(stat_cpu, Stat::DirectDispatch);
            } else {
                self.stat(stat_cpu, Stat::Pinned);
            }
            return Pick::direct(cpu);
        }

        // WAKER IS GOING TO SLEEP: RUN ON ITS CPU IF THE DOMAIN ISN'T SATURATED
        if wake_flags.contains(WakeFlags::SYNC) && !waker.waker_exiting {
            let cpu = waker.waker_cpu;
            if let Some(domc) = self.domain(t.dom_id) {
                if self.local_queued(cpu) == 0
                    && domc.cpumask.intersects(&self.idle.idle_mask())
                    && t.allowed.test(cpu)
                {
                    self.stat(stat_cpu, Stat::WakeSync);
                    return Pick::direct(cpu);
                }
            }
        }

        let p_cpumask = &t.cpumask;
        let has_idle_cores = self.idle.has_idle_cores();
        // PULLED OUT TO A FOREIGN DOMAIN BY GREEDY EXECUTION?
        let prev_domestic = p_cpumask.test(prev_cpu);

        // KEEP PREV ONLY IF ITS WHOLE CORE IS IDLE
        if prev_domestic {
            if self.idle.idle_smt_mask().test(prev_cpu) && self.idle.test_and_clear_cpu_idle(prev_cpu) {
                self.stat(stat_cpu, Stat::PrevIdle);
                return Pick::direct(prev_cpu);
            }
        } else if self.tuner.direct_greedy.test_cpu(prev_cpu)
            && t.allowed.test(prev_cpu)
            && self.idle.idle_smt_mask().test(prev_cpu)
            && self.idle.test_and_clear_cpu_idle(prev_cpu)
        {
            self.stat(stat_cpu, Stat::GreedyIdle);
            return Pick::direct(prev_cpu);
        }

        if has_idle_cores {
            if let Some(cpu) = self.idle.pick_idle_cpu(p_cpumask, true) {
                self.stat(stat_cpu, Stat::DirectDispatch);
                return Pick::direct(cpu);
            }
        }

        // CORE IS BUSY BUT PREV ITSELF IS IDLE: KEEP L1/L2 WARM
        if prev_domestic && self.idle.test_and_clear_cpu_idle(prev_cpu) {
            self.stat(stat_cpu, Stat::DirectDispatch);
            return Pick::direct(prev_cpu);
        }

        if let Some(cpu) = self.idle.pick_idle_cpu(p_cpumask, false) {
            self.stat(stat_cpu, Stat::DirectDispatch);
            return Pick::direct(cpu);
        }

        // DOMAIN IS FULL. PUSH INTO UNDER-UTILIZED DOMAINS, CORES FIRST.
        if t.all_cpus && !self.tuner.direct_greedy.is_empty() {
            if let Some(pick) = self.pick_direct_greedy(prev_cpu, has_idle_cores, stat_cpu) {
                return pick;
            }
        }

        if prev_domestic {
            return Pick::queue(prev_cpu);
        }
        Pick::queue(self.idle.pick_any_cpu(p_cpumask).unwrap_or(prev_cpu))
    }

    fn pick_direct_greedy(&self, prev_cpu: u32, has_idle_cores: bool, stat_cpu: u32) -> Option<Pick> {
        let domc = self.domain(self.topo.cpu_to_dom(prev_cpu))?;
        let local: Cpumask = domc.direct_greedy.snapshot();
        let mut far = self.tuner.direct_greedy.snapshot();
        // CROSSING NODES SPREADS THE WORKING SET; OPT-IN ONLY
        if !self.cfg.direct_greedy_numa {
            far = far.and(&domc.node_cpumask);
        }

        let scopes = [(&local, Stat::DirectGreedy), (&far, Stat::DirectGreedyFar)];
        let passes: &[bool] = if has_idle_cores { &[true, false] } else { &[false] };
        for &core in passes {
            for (mask, stat) in scopes {
                if let Some(cpu) = self.idle.pick_idle_cpu(mask, core) {
                    self.stat(stat_cpu, stat);
                    return Some(Pick::direct(cpu));
                }
            }
        }
        None
    }
}
