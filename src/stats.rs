// MULTIDOM STATISTICS
// PER-CPU COUNTERS, ONE CACHE LINE GROUP PER CPU. WRITERS ONLY TOUCH THEIR
// OWN CPU'S SLOT; READERS SUM ACROSS CPUS AND MAY SEE A TORN TOTAL.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stat {
    WakeSync,
    PrevIdle,
    GreedyIdle,
    Pinned,
    DirectDispatch,
    DirectGreedy,
    DirectGreedyFar,
    DsqDispatch,
    GreedyLocal,
    GreedyXnuma,
    Repatriate,
    KickGreedy,
    LoadBalance,
    TaskGetErr,
    DlClamp,
    DlPreset,
}

pub const NR_STATS: usize = 16;

impl Stat {
    pub const ALL: [Stat; NR_STATS] = [
        Stat::WakeSync,
        Stat::PrevIdle,
        Stat::GreedyIdle,
        Stat::Pinned,
        Stat::DirectDispatch,
        Stat::DirectGreedy,
        Stat::DirectGreedyFar,
        Stat::DsqDispatch,
        Stat::GreedyLocal,
        Stat::GreedyXnuma,
        Stat::Repatriate,
        Stat::KickGreedy,
        Stat::LoadBalance,
        Stat::TaskGetErr,
        Stat::DlClamp,
        Stat::DlPreset,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stat::WakeSync => "wsync",
            Stat::PrevIdle => "prev_idle",
            Stat::GreedyIdle => "greedy_idle",
            Stat::Pinned => "pin",
            Stat::DirectDispatch => "dir",
            Stat::DirectGreedy => "dir_greedy",
            Stat::DirectGreedyFar => "dir_greedy_far",
            Stat::DsqDispatch => "dsq",
            Stat::GreedyLocal => "greedy_local",
            Stat::GreedyXnuma => "greedy_xnuma",
            Stat::Repatriate => "repatriate",
            Stat::KickGreedy => "kick_greedy",
            Stat::LoadBalance => "lb",
            Stat::TaskGetErr => "task_err",
            Stat::DlClamp => "dl_clamp",
            Stat::DlPreset => "dl_preset",
        }
    }
}

pub struct PerCpuStats {
    cpus: Box<[CachePadded<[AtomicU64; NR_STATS]>]>,
}

impl PerCpuStats {
    pub fn new(nr_cpus: u32) -> Self {
        let nr = nr_cpus.max(1) as usize;
        Self {
            cpus: (0..nr)
                .map(|_| CachePadded::new(std::array::from_fn(|_| AtomicU64::new(0))))
                .collect(),
        }
    }

    // OUT-OF-RANGE CPUS (OFFLINE, UNKNOWN) LAND IN SLOT 0 SO NOTHING IS LOST
    pub fn inc(&self, cpu: u32, stat: Stat) {
        let slot = self.cpus.get(cpu as usize).unwrap_or(&self.cpus[0]);
        slot[stat as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(&self) -> StatsSnapshot {
        let mut total = [0u64; NR_STATS];
        for cpu in self.cpus.iter() {
            for (t, c) in total.iter_mut().zip(cpu.iter()) {
                *t += c.load(Ordering::Relaxed);
            }
        }
        StatsSnapshot { counts: total }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    counts: [u64; NR_STATS],
}

impl StatsSnapshot {
    pub fn from_counts(counts: [u64; NR_STATS]) -> Self {
        Self { counts }
    }

    pub fn get(&self, stat: Stat) -> u64 {
        self.counts[stat as usize]
    }

    // COUNTERS ONLY GROW; SATURATE ANYWAY IN CASE prev CAME FROM A NEWER READ
    pub fn delta(&self, prev: &StatsSnapshot) -> StatsSnapshot {
        let mut counts = [0u64; NR_STATS];
        for (i, c) in counts.iter_mut().enumerate() {
            *c = self.counts[i].saturating_sub(prev.counts[i]);
        }
        StatsSnapshot { counts }
    }

    // EVERY PLACEMENT DECISION LANDS IN EXACTLY ONE OF THESE
    pub fn total_dispatched(&self) -> u64 {
        [
            Stat::WakeSync,
            Stat::PrevIdle,
            Stat::GreedyIdle,
            Stat::Pinned,
            Stat::DirectDispatch,
            Stat::DirectGreedy,
            Stat::DirectGreedyFar,
            Stat::DsqDispatch,
            Stat::GreedyLocal,
            Stat::GreedyXnuma,
        ]
        .iter()
        .map(|&s| self.get(s))
        .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stat, u64)> + '_ {
        Stat::ALL.iter().map(move |&s| (s, self.get(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_across_cpus() {
        let stats = PerCpuStats::new(4);
        stats.inc(0, Stat::PrevIdle);
        stats.inc(3, Stat::PrevIdle);
        stats.inc(2, Stat::DsqDispatch);
        let snap = stats.read();
        assert_eq!(snap.get(Stat::PrevIdle), 2);
        assert_eq!(snap.get(Stat::DsqDispatch), 1);
        assert_eq!(snap.total_dispatched(), 3);
    }

    #[test]
    fn out_of_range_cpu_counts_in_slot_zero() {
        let stats = PerCpuStats::new(2);
        stats.inc(99, Stat::TaskGetErr);
        assert_eq!(stats.read().get(Stat::TaskGetErr), 1);
    }

    #[test]
    fn delta_subtracts() {
        let stats = PerCpuStats::new(1);
        stats.inc(0, Stat::KickGreedy);
        let a = stats.read();
        stats.inc(0, Stat::KickGreedy);
        stats.inc(0, Stat::KickGreedy);
        let b = stats.read();
        assert_eq!(b.delta(&a).get(Stat::KickGreedy), 2);
        assert_eq!(a.delta(&b).get(Stat::KickGreedy), 0);
    }

    #[test]
    fn labels_unique() {
        let mut labels: Vec<&str> = Stat::ALL.iter().map(|s| s.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), NR_STATS);
    }
}
