// MULTIDOM EVENT LOG
// RECORDS PER-TICK COUNTER DELTAS DURING A RUN
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE RECORDING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::consts::NSEC_PER_SEC;
use crate::stats::{Stat, StatsSnapshot, NR_STATS};

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy, Default)]
pub struct Snapshot {
    pub ts_ns:    u64,
    // COUNTER DELTAS SINCE THE PREVIOUS SNAPSHOT
    pub stats:    StatsSnapshot,
    // RUNNABLE TASKS ACROSS ALL DOMAINS AT SAMPLE TIME
    pub runnable: i64,
    // TASKS WAITING IN DOMAIN QUEUES AT SAMPLE TIME
    pub queued:   u64,
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![Snapshot::default(); MAX_SNAPSHOTS],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // RECORD ONE SNAPSHOT. CALLED ONCE PER TICK FROM THE MONITOR LOOP.
    // OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn snapshot(&mut self, ts_ns: u64, stats: StatsSnapshot, runnable: i64, queued: u64) {
        self.snapshots[self.head] = Snapshot {
            ts_ns,
            stats,
            runnable,
            queued,
        };
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| &self.snapshots[(start + i) % MAX_SNAPSHOTS])
    }

    // SUM OF EVERY RECORDED DELTA
    pub fn totals(&self) -> StatsSnapshot {
        let mut acc = [0u64; NR_STATS];
        for s in self.iter_chronological() {
            for (i, (_, v)) in s.stats.iter().enumerate() {
                acc[i] += v;
            }
        }
        StatsSnapshot::from_counts(acc)
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<12} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10}",
            "TIME_S", "DISPATCH", "DIRECT", "DSQ", "GREEDY", "XNUMA", "RUNNABLE", "QUEUED");
        println!("{}", "-".repeat(86));

        for s in std::iter::once(first).chain(iter) {
            let elapsed_s = s.ts_ns.saturating_sub(base_ts) as f64 / NSEC_PER_SEC as f64;
            let direct = s.stats.get(Stat::DirectDispatch) + s.stats.get(Stat::PrevIdle);
            let greedy = s.stats.get(Stat::GreedyLocal)
                + s.stats.get(Stat::DirectGreedy)
                + s.stats.get(Stat::DirectGreedyFar);
            println!("{:<10.1} {:<12} {:<10} {:<10} {:<10} {:<10} {:<10} {:<10}",
                elapsed_s, s.stats.total_dispatched(), direct, s.stats.get(Stat::DsqDispatch),
                greedy, s.stats.get(Stat::GreedyXnuma), s.runnable, s.queued);
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }
        let (Some(first), Some(last)) = (self.iter_chronological().next(), self.iter_chronological().last()) else {
            return;
        };

        let totals = self.totals();
        let total_d = totals.total_dispatched();
        let peak_d = self
            .iter_chronological()
            .map(|s| s.stats.total_dispatched())
            .max()
            .unwrap_or(0);
        let elapsed_s = last.ts_ns.saturating_sub(first.ts_ns) as f64 / NSEC_PER_SEC as f64;

        println!("\n{}", "=".repeat(50));
        println!("MULTIDOM SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TOTAL DISPATCHES:  {}", total_d);
        println!("  PEAK DISPATCH/TICK:{}", peak_d);
        if elapsed_s > 0.0 {
            println!("  AVG DISPATCH/S:    {:.0}", total_d as f64 / elapsed_s);
        }
        if total_d > 0 {
            let queued = totals.get(Stat::DsqDispatch) + totals.get(Stat::GreedyLocal) + totals.get(Stat::GreedyXnuma);
            let direct_pct = (total_d - queued.min(total_d)) as f64 / total_d as f64 * 100.0;
            println!("  DIRECT RATE:       {:.1}%", direct_pct);
        }
        for (stat, v) in totals.iter() {
            if v > 0 {
                println!("  {:<19}{}", format!("{}:", stat.label().to_uppercase()), v);
            }
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
        println!("  SAMPLES:           {}", self.len);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
