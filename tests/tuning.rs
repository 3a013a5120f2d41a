// MULTIDOM TUNING POLICY TESTS
// UTILIZATION MATH, GREEDY SCHMITT TRIGGER, MASK CONSTRUCTION
//
// ALL TESTS USE PURE FUNCTIONS FROM multidom::tuning. NO SCHEDULER STATE
// EXCEPT WHERE THE MASKS ARE PUBLISHED AT THE END.

use multidom::config::SchedConfig;
use multidom::consts::{NSEC_PER_MSEC, NSEC_PER_SEC};
use multidom::cpumask::Cpumask;
use multidom::domain::{BucketLoad, DomainLoad};
use multidom::host::ManualHost;
use multidom::ravg::RAVG_1;
use multidom::scheduler::Scheduler;
use multidom::task::{TaskInit, WakeCtx, WakeFlags};
use multidom::topology::{Topology, TopologyInput};
use multidom::tuning::{
    greedy_state, tune_due, util_pct_from_busy, util_pct_from_dcycle, GreedyPolicy,
    DIRECT_GREEDY_UNDER_PCT, GREEDY_HYSTERESIS_PCT, KICK_GREEDY_UNDER_PCT, TUNE_INTERVAL_NS,
};

fn two_domains() -> Topology {
    Topology::build(TopologyInput::uniform(8, 2, 2)).unwrap()
}

// === UTILIZATION ===

#[test]
fn busy_util_full_and_half() {
    // 4 CPUS, 100MS: 400MS OF CAPACITY
    assert_eq!(util_pct_from_busy(400 * NSEC_PER_MSEC, 4, 100 * NSEC_PER_MSEC), 100);
    assert_eq!(util_pct_from_busy(200 * NSEC_PER_MSEC, 4, 100 * NSEC_PER_MSEC), 50);
    assert_eq!(util_pct_from_busy(0, 4, 100 * NSEC_PER_MSEC), 0);
}

#[test]
fn busy_util_saturates_and_survives_zero_capacity() {
    // OVER-ACCOUNTED BUSY TIME NEVER REPORTS MORE THAN 100%
    assert_eq!(util_pct_from_busy(10 * NSEC_PER_SEC, 1, NSEC_PER_SEC), 100);
    assert_eq!(util_pct_from_busy(NSEC_PER_SEC, 0, NSEC_PER_SEC), 0);
    assert_eq!(util_pct_from_busy(NSEC_PER_SEC, 4, 0), 0);
}

#[test]
fn dcycle_util_over_domain_cpus() {
    // TWO ALWAYS-RUNNABLE TASKS ON A 4-CPU DOMAIN: 50%
    let load = DomainLoad {
        dom: 0,
        buckets: vec![BucketLoad { dcycle: 2, avg: 2 * RAVG_1 }],
    };
    assert_eq!(util_pct_from_dcycle(&load, 4), 50);
    assert_eq!(util_pct_from_dcycle(&load, 1), 100);
    assert_eq!(util_pct_from_dcycle(&load, 0), 0);
}

// === GREEDY STATE (SCHMITT TRIGGER) ===

#[test]
fn greedy_enters_below_threshold() {
    assert!(greedy_state(false, DIRECT_GREEDY_UNDER_PCT - 1, DIRECT_GREEDY_UNDER_PCT));
    assert!(!greedy_state(false, DIRECT_GREEDY_UNDER_PCT, DIRECT_GREEDY_UNDER_PCT));
}

#[test]
fn greedy_stays_in_dead_zone() {
    // ABOVE THE ENTRY EDGE BUT INSIDE THE HYSTERESIS BAND -> STAYS GREEDY
    let util = DIRECT_GREEDY_UNDER_PCT + GREEDY_HYSTERESIS_PCT;
    assert!(greedy_state(true, util, DIRECT_GREEDY_UNDER_PCT));
    // SAME UTILIZATION FROM OUTSIDE -> STAYS OUT
    assert!(!greedy_state(false, util, DIRECT_GREEDY_UNDER_PCT));
}

#[test]
fn greedy_leaves_above_band() {
    let util = DIRECT_GREEDY_UNDER_PCT + GREEDY_HYSTERESIS_PCT + 1;
    assert!(!greedy_state(true, util, DIRECT_GREEDY_UNDER_PCT));
}

// === MASK CONSTRUCTION ===

#[test]
fn idle_domain_cpus_become_greedy() {
    let topo = two_domains();
    let mut policy = GreedyPolicy::new(2, DIRECT_GREEDY_UNDER_PCT, KICK_GREEDY_UNDER_PCT);
    let masks = policy.update(&topo, &[20, 100]);
    assert_eq!(masks.direct_greedy.to_string(), "0-3");
    assert_eq!(masks.kick_greedy.to_string(), "0-3");
    assert!(policy.is_direct_greedy(0));
    assert!(!policy.is_direct_greedy(1));
}

#[test]
fn separate_direct_and_kick_thresholds() {
    let topo = two_domains();
    let mut policy = GreedyPolicy::new(2, 50, 80);
    // DOM0 AT 60%: KICK-GREEDY ONLY
    let masks = policy.update(&topo, &[60, 10]);
    assert_eq!(masks.direct_greedy.to_string(), "4-7");
    assert_eq!(masks.kick_greedy.to_string(), "0-7");
    assert!(policy.is_kick_greedy(0));
    assert!(!policy.is_direct_greedy(0));
}

#[test]
fn missing_samples_count_as_busy() {
    let topo = two_domains();
    let mut policy = GreedyPolicy::new(2, DIRECT_GREEDY_UNDER_PCT, KICK_GREEDY_UNDER_PCT);
    let masks = policy.update(&topo, &[0]);
    assert_eq!(masks.direct_greedy.to_string(), "0-3");
    assert!(!policy.is_direct_greedy(1));
}

#[test]
fn membership_carries_across_updates() {
    let topo = two_domains();
    let mut policy = GreedyPolicy::new(2, DIRECT_GREEDY_UNDER_PCT, KICK_GREEDY_UNDER_PCT);
    policy.update(&topo, &[50, 50]);
    // BOTH RISE INTO THE DEAD ZONE: STILL GREEDY
    let masks = policy.update(&topo, &[DIRECT_GREEDY_UNDER_PCT + 1, DIRECT_GREEDY_UNDER_PCT + 1]);
    assert_eq!(masks.direct_greedy.to_string(), "0-7");
    // ONE SATURATES: DROPS OUT
    let masks = policy.update(&topo, &[100, DIRECT_GREEDY_UNDER_PCT + 1]);
    assert_eq!(masks.direct_greedy.to_string(), "4-7");
}

// === TICK PACING ===

#[test]
fn tune_due_after_interval() {
    assert!(!tune_due(NSEC_PER_SEC, NSEC_PER_SEC + TUNE_INTERVAL_NS - 1));
    assert!(tune_due(NSEC_PER_SEC, NSEC_PER_SEC + TUNE_INTERVAL_NS));
    // CLOCK NEVER GOES BACKWARDS, BUT A STALE last IS NOT A PANIC
    assert!(!tune_due(NSEC_PER_SEC, 0));
}

// === PUBLISHED INTO THE CORE ===

#[test]
fn masks_reach_the_core_on_next_selection() {
    let s = Scheduler::init(TopologyInput::uniform(8, 2, 2), SchedConfig::default(), ManualHost::new(NSEC_PER_SEC))
        .unwrap();
    let mut policy = GreedyPolicy::new(2, DIRECT_GREEDY_UNDER_PCT, KICK_GREEDY_UNDER_PCT);
    let masks = policy.update(s.topology(), &[10, 100]);
    s.write_tune_input(masks.direct_greedy, masks.kick_greedy);

    // NOT APPLIED UNTIL THE HOT PATH RUNS
    assert!(s.direct_greedy_mask().is_empty());

    assert!(s.on_task_created(1, TaskInit::new(Cpumask::full(8))));
    s.select_cpu(1, 0, WakeFlags::NONE, WakeCtx { waker_cpu: 0, waker_exiting: false });
    assert_eq!(s.direct_greedy_mask().to_string(), "0-3");
    assert_eq!(s.kick_greedy_mask().to_string(), "0-3");
    assert_eq!(s.domain(0).unwrap().direct_greedy.snapshot().to_string(), "0-3");
    assert!(s.domain(1).unwrap().direct_greedy.is_empty());
}
