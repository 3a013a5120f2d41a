// MULTIDOM DISPATCH TESTS
// LOCAL QUEUES, DOMAIN QUEUE ORDER, SAME-NODE AND CROSS-NODE STEALING

use multidom::config::SchedConfig;
use multidom::consts::{NSEC_PER_MSEC, NSEC_PER_SEC, Pid};
use multidom::cpumask::Cpumask;
use multidom::host::ManualHost;
use multidom::scheduler::Scheduler;
use multidom::stats::Stat;
use multidom::task::{TaskInit, WakeCtx, WakeFlags};
use multidom::topology::TopologyInput;

fn sched(input: TopologyInput, cfg: SchedConfig) -> Scheduler<ManualHost> {
    Scheduler::init(input, cfg, ManualHost::new(NSEC_PER_SEC)).unwrap()
}

fn spawn_on(s: &Scheduler<ManualHost>, pid: Pid, allowed: Cpumask, cpu: u32) {
    let mut init = TaskInit::new(allowed);
    init.cpu = cpu;
    assert!(s.on_task_created(pid, init));
}

fn wake(s: &Scheduler<ManualHost>, pid: Pid) {
    s.on_runnable(pid, None);
    s.on_enqueue(pid);
}

// === LOCAL AND DOMAIN QUEUES ===

#[test]
fn local_queue_beats_domain_queue() {
    let s = sched(TopologyInput::uniform(4, 1, 1), SchedConfig::default());
    spawn_on(&s, 1, Cpumask::full(4), 0);
    spawn_on(&s, 2, Cpumask::full(4), 0);
    wake(&s, 1);

    s.set_cpu_idle(2, true);
    s.on_runnable(2, None);
    assert_eq!(s.select_cpu(2, 2, WakeFlags::NONE, WakeCtx { waker_cpu: 0, waker_exiting: false }), 2);
    s.on_enqueue(2);
    assert_eq!(s.local_queued(2), 1);
    assert_eq!(s.dom_queued(0), 1);

    assert_eq!(s.on_dispatch(2), Some(2));
    assert_eq!(s.on_dispatch(2), Some(1));
    assert_eq!(s.on_dispatch(2), None);
    assert_eq!(s.read_stats().get(Stat::DsqDispatch), 1);
    assert!(!s.task(1).unwrap().queued);
    assert_eq!(s.task(1).unwrap().cpu, 2);
}

#[test]
fn lower_vtime_runs_first() {
    let s = sched(TopologyInput::uniform(4, 1, 1), SchedConfig::default());
    spawn_on(&s, 1, Cpumask::full(4), 0);
    spawn_on(&s, 2, Cpumask::full(4), 0);

    // TASK 1 BURNS 10MS, TASK 2 HAS NOT RUN
    s.on_runnable(1, None);
    s.on_running(1, 0);
    s.host().advance(10 * NSEC_PER_MSEC);
    s.on_stopping(1, true);
    s.on_enqueue(1);
    wake(&s, 2);

    assert_eq!(s.on_dispatch(0), Some(2));
    assert_eq!(s.on_dispatch(0), Some(1));
}

#[test]
fn fifo_mode_keeps_arrival_order() {
    let cfg = SchedConfig { fifo_sched: true, ..SchedConfig::default() };
    let s = sched(TopologyInput::uniform(4, 1, 1), cfg);
    for pid in 1..=3 {
        spawn_on(&s, pid, Cpumask::full(4), 0);
    }
    // TASK 1 RUNS A WHILE; FIFO IGNORES VTIME
    s.on_runnable(1, None);
    s.on_running(1, 0);
    s.host().advance(10 * NSEC_PER_MSEC);
    s.on_stopping(1, true);
    s.on_enqueue(1);
    wake(&s, 2);
    wake(&s, 3);

    assert_eq!(s.on_dispatch(1), Some(1));
    assert_eq!(s.on_dispatch(1), Some(2));
    assert_eq!(s.on_dispatch(1), Some(3));
}

#[test]
fn destroyed_task_skipped_at_dispatch() {
    let s = sched(TopologyInput::uniform(4, 1, 1), SchedConfig::default());
    spawn_on(&s, 1, Cpumask::full(4), 0);
    spawn_on(&s, 2, Cpumask::full(4), 0);
    wake(&s, 1);
    wake(&s, 2);

    s.on_task_destroyed(1);
    assert_eq!(s.on_dispatch(3), Some(2));
    assert_eq!(s.on_dispatch(3), None);
    assert!(!s.exited());
}

#[test]
fn dispatch_on_bogus_cpu_is_reported() {
    let s = sched(TopologyInput::uniform(4, 1, 1), SchedConfig::default());
    assert_eq!(s.on_dispatch(17), None);
    assert!(s.exited());
}

// === AFFINITY CHANGES WHILE QUEUED ===

#[test]
fn queued_task_follows_affinity_to_new_domain() {
    // NO STEALING: ONLY THE HOME DOMAIN'S CPUS WILL EVER LOOK
    let cfg = SchedConfig { greedy_threshold: 0, ..SchedConfig::default() };
    let s = sched(TopologyInput::uniform(8, 2, 2), cfg);
    spawn_on(&s, 1, Cpumask::full(8), 0);
    assert_eq!(s.task(1).unwrap().dom_id, 1);
    wake(&s, 1);
    assert_eq!(s.dom_queued(1), 1);
    s.host().take_kicks();

    s.on_set_affinity(1, Cpumask::from_cpus(0..4));
    let t = s.task(1).unwrap();
    assert_eq!(t.dom_id, 0);
    assert!(t.queued);
    assert_eq!(s.dom_queued(0), 1);
    assert_eq!(s.dom_queued(1), 0);
    let kicks = s.host().take_kicks();
    assert!(!kicks.is_empty());
    assert!(kicks.iter().all(|&cpu| cpu < 4));

    assert_eq!(s.on_dispatch(4), None);
    assert_eq!(s.on_dispatch(0), Some(1));
    assert!(!s.task(1).unwrap().queued);
    assert!(!s.exited());
}

#[test]
fn local_queue_entry_follows_affinity() {
    let s = sched(TopologyInput::uniform(4, 1, 1), SchedConfig::default());
    spawn_on(&s, 1, Cpumask::full(4), 0);
    s.set_cpu_idle(2, true);
    s.on_runnable(1, None);
    assert_eq!(s.select_cpu(1, 2, WakeFlags::NONE, WakeCtx { waker_cpu: 0, waker_exiting: false }), 2);
    s.on_enqueue(1);
    assert_eq!(s.local_queued(2), 1);

    // CPU 2 IS NO LONGER ALLOWED
    s.on_set_affinity(1, Cpumask::from_cpus([0, 1]));
    assert_eq!(s.local_queued(2), 0);
    assert_eq!(s.dom_queued(0), 1);
    assert_eq!(s.on_dispatch(2), None);
    assert_eq!(s.on_dispatch(1), Some(1));
    assert!(!s.exited());
}

#[test]
fn local_queue_entry_stays_while_still_allowed() {
    let s = sched(TopologyInput::uniform(4, 1, 1), SchedConfig::default());
    spawn_on(&s, 1, Cpumask::full(4), 0);
    s.set_cpu_idle(2, true);
    s.on_runnable(1, None);
    assert_eq!(s.select_cpu(1, 2, WakeFlags::NONE, WakeCtx { waker_cpu: 0, waker_exiting: false }), 2);
    s.on_enqueue(1);

    s.on_set_affinity(1, Cpumask::from_cpus([2, 3]));
    assert_eq!(s.local_queued(2), 1);
    assert_eq!(s.dom_queued(0), 0);
    assert_eq!(s.on_dispatch(2), Some(1));
}

// === SAME-NODE GREEDY ===

#[test]
fn idle_cpu_steals_from_sibling_domain() {
    // ONE NODE, DOMAINS {0-3} AND {4-7}
    let s = sched(TopologyInput::uniform(8, 2, 2), SchedConfig::default());
    // CURSOR 1 -> DOMAIN 0
    spawn_on(&s, 1, Cpumask::full(8), 1);
    assert_eq!(s.task(1).unwrap().dom_id, 0);
    wake(&s, 1);

    assert_eq!(s.on_dispatch(4), Some(1));
    let stats = s.read_stats();
    assert_eq!(stats.get(Stat::GreedyLocal), 1);
    assert_eq!(stats.get(Stat::DsqDispatch), 0);
    // STILL HOMED IN DOMAIN 0
    assert_eq!(s.task(1).unwrap().dom_id, 0);
    assert_eq!(s.dom_queued(0), 0);
}

#[test]
fn steal_skips_tasks_that_cannot_run_here() {
    let s = sched(TopologyInput::uniform(8, 2, 2), SchedConfig::default());
    spawn_on(&s, 1, Cpumask::from_cpus(0..4), 0);
    spawn_on(&s, 2, Cpumask::full(8), 1);
    assert_eq!(s.task(1).unwrap().dom_id, 0);
    assert_eq!(s.task(2).unwrap().dom_id, 0);
    wake(&s, 1);
    wake(&s, 2);

    // CPU 4 PASSES OVER THE CONFINED TASK
    assert_eq!(s.on_dispatch(4), Some(2));
    assert_eq!(s.on_dispatch(4), None);
    assert_eq!(s.dom_queued(0), 1);
    // ITS OWN DOMAIN STILL GETS IT
    assert_eq!(s.on_dispatch(0), Some(1));
}

#[test]
fn zero_threshold_disables_local_stealing() {
    let cfg = SchedConfig { greedy_threshold: 0, ..SchedConfig::default() };
    let s = sched(TopologyInput::uniform(8, 2, 2), cfg);
    spawn_on(&s, 1, Cpumask::full(8), 1);
    wake(&s, 1);
    assert_eq!(s.on_dispatch(4), None);
    assert_eq!(s.dom_queued(0), 1);
}

// === CROSS-NODE GREEDY ===

fn x_numa_sched() -> Scheduler<ManualHost> {
    // TWO NODES, ONE DOMAIN EACH
    let cfg = SchedConfig {
        greedy_threshold: 0,
        greedy_threshold_x_numa: 2,
        ..SchedConfig::default()
    };
    sched(TopologyInput::uniform(8, 2, 1), cfg)
}

// THE SCAN STARTS FROM THE CPU'S ROUND-ROBIN CURSOR, SO IT MAY LAND ON ITS
// OWN DOMAIN FIRST. GIVE IT ONE FULL ROTATION.
fn dispatch_within_rotation(s: &Scheduler<ManualHost>, cpu: u32) -> Option<Pid> {
    (0..s.topology().nr_doms).find_map(|_| s.on_dispatch(cpu))
}

#[test]
fn cross_node_steal_above_threshold() {
    let s = x_numa_sched();
    // ODD CURSORS ON A 2-DOMAIN BOX ALL LAND ON DOMAIN 0
    for (pid, cpu) in [(1, 1), (2, 3), (3, 5)] {
        spawn_on(&s, pid, Cpumask::full(8), cpu);
        assert_eq!(s.task(pid).unwrap().dom_id, 0);
        wake(&s, pid);
    }
    assert_eq!(s.dom_queued(0), 3);

    let pid = dispatch_within_rotation(&s, 4);
    assert!(pid.is_some());
    assert_eq!(s.read_stats().get(Stat::GreedyXnuma), 1);
    assert_eq!(s.dom_queued(0), 2);

    assert!(dispatch_within_rotation(&s, 4).is_some());
    assert_eq!(s.dom_queued(0), 1);

    // BELOW THE THRESHOLD: LEFT FOR NODE 0
    assert_eq!(dispatch_within_rotation(&s, 4), None);
    assert_eq!(s.dom_queued(0), 1);
    assert_eq!(s.read_stats().get(Stat::GreedyXnuma), 2);
}

#[test]
fn cross_node_disabled_by_default() {
    let s = sched(TopologyInput::uniform(8, 2, 1), SchedConfig::default());
    for (pid, cpu) in [(1, 1), (2, 3), (3, 5)] {
        spawn_on(&s, pid, Cpumask::full(8), cpu);
        wake(&s, pid);
    }
    // CPU 4 HAS NO SAME-NODE SIBLINGS AND X-NUMA IS OFF
    assert_eq!(dispatch_within_rotation(&s, 4), None);
    assert_eq!(s.dom_queued(0), 3);
}
