// MULTIDOM TUNING POLICY
// PURE FUNCTIONS: DOMAIN UTILIZATION IN, GREEDY CPU SETS OUT.
// THE CALLER PUBLISHES THE RESULT THROUGH Scheduler::write_tune_input.

use crate::consts::NSEC_PER_SEC;
use crate::cpumask::Cpumask;
use crate::domain::DomainLoad;
use crate::ravg::RAVG_1;
use crate::topology::Topology;

// GREEDY THRESHOLDS (SCHMITT TRIGGER)
// A DOMAIN JOINS A GREEDY SET BELOW under_pct AND LEAVES ABOVE
// under_pct + GREEDY_HYSTERESIS_PCT. THE DEAD ZONE KEEPS A DOMAIN
// HOVERING AT THE BOUNDARY FROM FLAPPING EVERY TICK.

pub const DIRECT_GREEDY_UNDER_PCT: u64 = 90;  // IDLE CPUS ACCEPT FOREIGN WAKEUPS
pub const KICK_GREEDY_UNDER_PCT: u64   = 90;  // IDLE CPUS GET KICKED TO STEAL
pub const GREEDY_HYSTERESIS_PCT: u64   = 5;

// UTILIZATION

// BUSY TIME OVER AN INTERVAL ACROSS nr_cpus CPUS, AS A PERCENTAGE (0..=100)
pub fn util_pct_from_busy(busy_ns: u64, nr_cpus: u32, interval_ns: u64) -> u64 {
    let capacity = (nr_cpus as u64).saturating_mul(interval_ns);
    if capacity == 0 {
        return 0;
    }
    ((busy_ns as u128 * 100 / capacity as u128) as u64).min(100)
}

// RUNNABLE DUTY CYCLE OF A DOMAIN OVER ITS CPU COUNT. A DOMAIN WITH MORE
// RUNNABLE WORK THAN CPUS SATURATES AT 100.
pub fn util_pct_from_dcycle(load: &DomainLoad, nr_cpus: u32) -> u64 {
    if nr_cpus == 0 {
        return 0;
    }
    let avg = load.dcycle_avg() as u128;
    ((avg * 100 / (RAVG_1 as u128 * nr_cpus as u128)) as u64).min(100)
}

// GREEDY STATE (SCHMITT TRIGGER)
// DIRECTION-AWARE: CURRENT MEMBERSHIP DECIDES WHICH EDGE APPLIES.

pub fn greedy_state(current: bool, util_pct: u64, under_pct: u64) -> bool {
    if current {
        util_pct <= under_pct + GREEDY_HYSTERESIS_PCT
    } else {
        util_pct < under_pct
    }
}

// PER-DOMAIN MEMBERSHIP CARRIED BETWEEN TICKS

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GreedyPolicy {
    pub direct_greedy_under: u64,
    pub kick_greedy_under: u64,
    direct: Vec<bool>,
    kick: Vec<bool>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GreedyMasks {
    pub direct_greedy: Cpumask,
    pub kick_greedy: Cpumask,
}

impl GreedyPolicy {
    pub fn new(nr_doms: u32, direct_greedy_under: u64, kick_greedy_under: u64) -> Self {
        Self {
            direct_greedy_under,
            kick_greedy_under,
            direct: vec![false; nr_doms as usize],
            kick: vec![false; nr_doms as usize],
        }
    }

    pub fn is_direct_greedy(&self, dom: u32) -> bool {
        self.direct.get(dom as usize).copied().unwrap_or(false)
    }

    pub fn is_kick_greedy(&self, dom: u32) -> bool {
        self.kick.get(dom as usize).copied().unwrap_or(false)
    }

    // ONE UTILIZATION SAMPLE PER DOMAIN, INDEXED BY DOMAIN ID.
    // MISSING SAMPLES COUNT AS FULLY BUSY.
    pub fn update(&mut self, topo: &Topology, dom_util_pct: &[u64]) -> GreedyMasks {
        let mut masks = GreedyMasks::default();

        for dom in 0..topo.nr_doms {
            let i = dom as usize;
            let util = dom_util_pct.get(i).copied().unwrap_or(100);
            if i >= self.direct.len() {
                self.direct.resize(i + 1, false);
                self.kick.resize(i + 1, false);
            }
            self.direct[i] = greedy_state(self.direct[i], util, self.direct_greedy_under);
            self.kick[i] = greedy_state(self.kick[i], util, self.kick_greedy_under);

            let Some(cpus) = topo.dom_cpumask(dom) else {
                continue;
            };
            if self.direct[i] {
                masks.direct_greedy = masks.direct_greedy.or(cpus);
            }
            if self.kick[i] {
                masks.kick_greedy = masks.kick_greedy.or(cpus);
            }
        }
        masks
    }
}

// TICK PACING

pub const TUNE_INTERVAL_NS: u64 = NSEC_PER_SEC / 10;  // 100MS

pub fn tune_due(last_ns: u64, now_ns: u64) -> bool {
    now_ns.saturating_sub(last_ns) >= TUNE_INTERVAL_NS
}
