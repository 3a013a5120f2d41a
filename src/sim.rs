// MULTIDOM WORKLOAD SIMULATOR
// DRIVES THE CORE THROUGH THE SAME CALLBACK SEQUENCE AN EXECUTION SUBSTRATE
// WOULD: WAKE -> ENQUEUE -> DISPATCH -> RUNNING -> STOPPING -> QUIESCENT.
// TIME IS A ManualHost CLOCK ADVANCED IN FIXED STEPS, SO A RUN WITH THE SAME
// TOPOLOGY AND WORKLOAD ALWAYS MAKES THE SAME DECISIONS.

use log::{debug, info};

use crate::config::SchedConfig;
use crate::consts::{Pid, NSEC_PER_MSEC, NSEC_PER_SEC, NSEC_PER_USEC};
use crate::cpumask::Cpumask;
use crate::error::InitError;
use crate::host::{Host, ManualHost};
use crate::scheduler::Scheduler;
use crate::stats::StatsSnapshot;
use crate::task::{TaskInit, WakeCtx, WakeFlags};
use crate::topology::TopologyInput;
use crate::tuning::{self, GreedyPolicy, GreedyMasks};

// WORKLOAD SHAPE
// EVERY TASK ALTERNATES A CPU BURST AND A SLEEP. LENGTHS VARY PER TASK BY
// FIXED RATIOS SO THE MIX IS UNEVEN BUT REPRODUCIBLE.

#[derive(Clone, Debug)]
pub struct Workload {
    pub nr_tasks: u32,
    pub run_ns: u64,
    pub sleep_ns: u64,
    // EVERY Nth TASK IS PINNED TO ONE CPU (0: NONE)
    pub pinned_every: u32,
    // EVERY Nth TASK IS CONFINED TO ITS FIRST DOMAIN (0: NONE)
    pub confined_every: u32,
    // WAKEUPS CHAIN: TASK i IS WOKEN SYNCHRONOUSLY BY TASK i-1 WHEN IT RUNS
    pub sync_wakeups: bool,
    pub step_ns: u64,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            nr_tasks: 32,
            run_ns: 2 * NSEC_PER_MSEC,
            sleep_ns: 3 * NSEC_PER_MSEC,
            pinned_every: 8,
            confined_every: 5,
            sync_wakeups: true,
            step_ns: 250 * NSEC_PER_USEC,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TaskState {
    Sleeping { wake_at: u64 },
    Waiting,
    Running { cpu: u32 },
}

struct SimTask {
    pid: Pid,
    burst_ns: u64,
    sleep_ns: u64,
    remaining: u64,
    prev_cpu: u32,
    state: TaskState,
}

#[derive(Default)]
struct SimCpu {
    curr: Option<usize>,
    slice_left: u64,
    // BUSY TIME SINCE THE LAST TUNE PASS
    busy_ns: u64,
}

// WHAT ONE SIMULATED SECOND LOOKED LIKE
#[derive(Clone, Debug)]
pub struct TickReport {
    pub now_ns: u64,
    pub stats: StatsSnapshot,
    pub dom_runnable: Vec<i64>,
    pub dom_queued: Vec<u32>,
    pub dom_util_pct: Vec<u64>,
    pub kicks: u64,
    pub greedy: GreedyMasks,
}

pub struct Simulator {
    sched: Scheduler<ManualHost>,
    workload: Workload,
    tasks: Vec<SimTask>,
    cpus: Vec<SimCpu>,
    policy: GreedyPolicy,
    greedy: GreedyMasks,
    last_tune_ns: u64,
    last_util_pct: Vec<u64>,
    last_stats: StatsSnapshot,
    kicks: u64,
}

fn pid_of(idx: usize) -> Pid {
    idx as Pid + 1
}

fn idx_of(pid: Pid) -> usize {
    (pid - 1) as usize
}

impl Simulator {
    pub fn new(input: TopologyInput, cfg: SchedConfig, workload: Workload) -> Result<Self, InitError> {
        let sched = Scheduler::init(input, cfg, ManualHost::new(NSEC_PER_SEC))?;
        let topo = sched.topology();
        let nr_cpus = topo.nr_cpus;
        let nr_doms = topo.nr_doms;
        let all = *topo.all_cpumask();
        let online: Vec<u32> = all.iter().collect();

        let mut tasks = Vec::with_capacity(workload.nr_tasks as usize);
        for i in 0..workload.nr_tasks {
            let idx = i as usize;
            let pid = pid_of(idx);
            let home = online[idx % online.len().max(1)];

            let allowed = if workload.pinned_every > 0 && i % workload.pinned_every == workload.pinned_every - 1 {
                Cpumask::from_cpus([home])
            } else if workload.confined_every > 0 && i % workload.confined_every == workload.confined_every - 1 {
                let dom = topo.cpu_to_dom(home);
                topo.dom_cpumask(dom).copied().unwrap_or(all)
            } else {
                Cpumask::full(nr_cpus)
            };

            let mut init = TaskInit::new(allowed);
            init.cpu = home;
            // A FEW HEAVIER TASKS SPREAD ACROSS THE WEIGHT BUCKETS
            init.weight = [100, 100, 200, 50][idx % 4];
            init.opted_in = true;
            if !sched.on_task_created(pid, init) {
                continue;
            }

            let burst_ns = (workload.run_ns * (2 + (i as u64 % 4)) / 3).max(workload.step_ns);
            let sleep_ns = workload.sleep_ns * (1 + (i as u64 * 7) % 5) / 3;
            tasks.push(SimTask {
                pid,
                burst_ns,
                sleep_ns,
                remaining: burst_ns,
                prev_cpu: home,
                // STAGGER THE FIRST WAKEUPS
                state: TaskState::Sleeping { wake_at: NSEC_PER_SEC + (i as u64) * workload.step_ns },
            });
        }

        info!("sim: {} tasks on {} cpus / {} domains", tasks.len(), all.weight(), nr_doms);

        let cpus = (0..nr_cpus).map(|_| SimCpu::default()).collect();
        Ok(Self {
            policy: GreedyPolicy::new(nr_doms, tuning::DIRECT_GREEDY_UNDER_PCT, tuning::KICK_GREEDY_UNDER_PCT),
            greedy: GreedyMasks::default(),
            last_tune_ns: NSEC_PER_SEC,
            last_util_pct: vec![0; nr_doms as usize],
            last_stats: StatsSnapshot::default(),
            kicks: 0,
            sched,
            workload,
            tasks,
            cpus,
        })
    }

    pub fn scheduler(&self) -> &Scheduler<ManualHost> {
        &self.sched
    }

    pub fn now(&self) -> u64 {
        self.sched.now()
    }

    // ADVANCE ONE STEP
    pub fn step(&mut self) {
        let step = self.workload.step_ns;
        let now = self.sched.host().advance(step);

        self.run_cpus(now, step);
        self.wake_tasks(now);
        self.dispatch_cpus();
        self.kicks += self.sched.host().take_kicks().len() as u64;

        if tuning::tune_due(self.last_tune_ns, now) {
            self.tune(now);
        }
    }

    // CHARGE THE STEP TO EVERY RUNNING TASK; RETIRE FINISHED BURSTS AND
    // EXPIRED SLICES
    fn run_cpus(&mut self, now: u64, step: u64) {
        let slice_ns = self.sched.config().slice_ns;
        for cpu in 0..self.cpus.len() {
            let Some(idx) = self.cpus[cpu].curr else {
                continue;
            };
            let task = &mut self.tasks[idx];
            let ran = step.min(task.remaining);
            task.remaining -= ran;
            let c = &mut self.cpus[cpu];
            c.busy_ns += ran;
            c.slice_left = c.slice_left.saturating_sub(ran);

            if task.remaining == 0 {
                self.sched.on_stopping(task.pid, false);
                self.sched.on_quiescent(task.pid);
                task.remaining = task.burst_ns;
                task.prev_cpu = cpu as u32;
                task.state = TaskState::Sleeping { wake_at: now + task.sleep_ns };
                c.curr = None;
            } else if c.slice_left == 0 {
                self.sched.on_stopping(task.pid, true);
                self.sched.on_enqueue(task.pid);
                task.prev_cpu = cpu as u32;
                task.state = TaskState::Waiting;
                c.curr = None;
                c.slice_left = slice_ns;
            }
        }
    }

    fn wake_tasks(&mut self, now: u64) {
        for idx in 0..self.tasks.len() {
            let TaskState::Sleeping { wake_at } = self.tasks[idx].state else {
                continue;
            };
            if wake_at > now {
                continue;
            }

            let prev_cpu = self.tasks[idx].prev_cpu;
            let waker = if self.workload.sync_wakeups && idx > 0 {
                match self.tasks[idx - 1].state {
                    TaskState::Running { cpu } => Some((self.tasks[idx - 1].pid, cpu)),
                    _ => None,
                }
            } else {
                None
            };

            let pid = self.tasks[idx].pid;
            let (flags, ctx) = match waker {
                Some((_, cpu)) => (WakeFlags::SYNC, WakeCtx { waker_cpu: cpu, waker_exiting: false }),
                None => (WakeFlags::NONE, WakeCtx { waker_cpu: prev_cpu, waker_exiting: false }),
            };
            self.sched.on_runnable(pid, waker.map(|(w, _)| w));
            self.sched.on_wake(pid, prev_cpu, flags, ctx);
            self.sched.on_enqueue(pid);
            self.tasks[idx].state = TaskState::Waiting;
        }
    }

    // EVERY FREE CPU ASKS THE CORE FOR WORK; NOTHING FOUND MEANS IDLE
    fn dispatch_cpus(&mut self) {
        let slice_ns = self.sched.config().slice_ns;
        let all = *self.sched.topology().all_cpumask();
        for cpu in all.iter() {
            if self.cpus[cpu as usize].curr.is_some() {
                continue;
            }
            match self.sched.on_dispatch(cpu) {
                Some(pid) => {
                    let idx = idx_of(pid);
                    self.sched.set_cpu_idle(cpu, false);
                    self.sched.on_running(pid, cpu);
                    self.tasks[idx].state = TaskState::Running { cpu };
                    let c = &mut self.cpus[cpu as usize];
                    c.curr = Some(idx);
                    c.slice_left = slice_ns;
                }
                None => self.sched.set_cpu_idle(cpu, true),
            }
        }
    }

    fn tune(&mut self, now: u64) {
        let interval = now - self.last_tune_ns;
        let topo = self.sched.topology();
        let util: Vec<u64> = (0..topo.nr_doms)
            .map(|dom| {
                let Some(mask) = topo.dom_cpumask(dom) else {
                    return 100;
                };
                let busy: u64 = mask.iter().map(|cpu| self.cpus[cpu as usize].busy_ns).sum();
                tuning::util_pct_from_busy(busy, mask.weight(), interval)
            })
            .collect();
        for c in self.cpus.iter_mut() {
            c.busy_ns = 0;
        }

        let masks = self.policy.update(topo, &util);
        if masks != self.greedy {
            let gen = self.sched.write_tune_input(masks.direct_greedy, masks.kick_greedy);
            debug!(
                "tune gen {}: direct_greedy={} kick_greedy={}",
                gen, masks.direct_greedy, masks.kick_greedy
            );
            self.greedy = masks;
        }
        self.last_util_pct = util;
        self.last_tune_ns = now;
    }

    // RUN UNTIL THE NEXT WHOLE SIMULATED SECOND AND REPORT IT
    pub fn run_tick(&mut self) -> TickReport {
        let target = (self.now() / NSEC_PER_SEC + 1) * NSEC_PER_SEC;
        while self.now() < target {
            self.step();
        }
        self.report()
    }

    pub fn report(&mut self) -> TickReport {
        let stats = self.sched.read_stats();
        let delta = stats.delta(&self.last_stats);
        self.last_stats = stats;
        let loads = self.sched.dom_dcycle_snapshot();
        let kicks = std::mem::take(&mut self.kicks);

        TickReport {
            now_ns: self.now(),
            stats: delta,
            dom_runnable: loads.iter().map(|l| l.nr_runnable()).collect(),
            dom_queued: (0..self.sched.topology().nr_doms).map(|d| self.sched.dom_queued(d)).collect(),
            dom_util_pct: self.last_util_pct.clone(),
            kicks,
            greedy: self.greedy,
        }
    }

    // TASKS CURRENTLY ON A CPU
    pub fn nr_running(&self) -> usize {
        self.cpus.iter().filter(|c| c.curr.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stat;

    fn sim(workload: Workload) -> Simulator {
        Simulator::new(TopologyInput::uniform(8, 2, 1), SchedConfig::default(), workload).unwrap()
    }

    #[test]
    fn runs_without_violations() {
        let mut s = sim(Workload::default());
        for _ in 0..3 {
            s.run_tick();
        }
        assert!(!s.scheduler().exited(), "{:?}", s.scheduler().exit_info());
        let stats = s.scheduler().read_stats();
        assert!(stats.total_dispatched() > 0);
        assert_eq!(stats.get(Stat::TaskGetErr), 0);
    }

    #[test]
    fn deterministic() {
        let mut a = sim(Workload::default());
        let mut b = sim(Workload::default());
        let ra = a.run_tick();
        let rb = b.run_tick();
        assert_eq!(ra.stats, rb.stats);
        assert_eq!(ra.dom_runnable, rb.dom_runnable);
    }

    #[test]
    fn light_load_makes_domains_greedy() {
        let mut s = sim(Workload {
            nr_tasks: 2,
            pinned_every: 0,
            confined_every: 0,
            ..Workload::default()
        });
        let report = s.run_tick();
        assert_eq!(report.greedy.direct_greedy.to_string(), "0-7");
        assert_eq!(s.scheduler().direct_greedy_mask().to_string(), "0-7");
    }

    #[test]
    fn never_more_running_than_cpus() {
        let mut s = sim(Workload {
            nr_tasks: 64,
            sleep_ns: 0,
            ..Workload::default()
        });
        for _ in 0..200 {
            s.step();
            assert!(s.nr_running() <= 8);
        }
        // SATURATED: EVERY CPU BUSY
        assert_eq!(s.nr_running(), 8);
        assert!(s.scheduler().read_stats().get(Stat::DsqDispatch) > 0);
    }
}
