// MULTIDOM DOMAINS
// PER-DOMAIN STATE: VIRTUAL CLOCK, DUTY-CYCLE BUCKETS, ACTIVE-TASK RING,
// DISPATCH QUEUE, DIRECT-GREEDY MASK.
//
// CONCURRENCY:
//   vtime_now      AtomicU64, ADVANCED BY CAS, NEVER REGRESSES
//   buckets        ONE parking_lot::Mutex PER (DOMAIN, WEIGHT BUCKET)
//   active ring    fetch_add ON write_idx; SLOTS OVERWRITTEN WHEN FULL
//   direct_greedy  PER-BIT ATOMICS, REWRITTEN BY THE TUNER

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::consts::{Pid, LB_LOAD_BUCKETS, LB_WEIGHT_PER_BUCKET, MAX_DOM_ACTIVE_PIDS};
use crate::cpumask::{AtomicCpumask, Cpumask};
use crate::dsq::DispatchQueue;
use crate::ravg::{RavgData, RAVG_1};

// WRAPPING "a IS EARLIER THAN b" FOR VIRTUAL TIMES
pub fn vtime_before(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) < 0
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoadBucket {
    // RUNNABLE TASKS IN THIS BUCKET. NEVER NEGATIVE.
    pub dcycle: i64,
    pub rd: RavgData,
}

pub struct ActiveTasks {
    gen: AtomicU64,
    read_idx: AtomicU64,
    write_idx: AtomicU64,
    pids: Box<[AtomicI32]>,
    // ONE READER AT A TIME
    reader: Mutex<()>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveSnapshot {
    // GENERATION THESE PIDS WERE RECORDED UNDER
    pub gen: u64,
    pub pids: Vec<Pid>,
    // MORE THAN MAX_DOM_ACTIVE_PIDS WRITES SINCE THE LAST READ; OLDEST LOST
    pub wrapped: bool,
}

impl ActiveTasks {
    fn new() -> Self {
        Self {
            gen: AtomicU64::new(1),
            read_idx: AtomicU64::new(0),
            write_idx: AtomicU64::new(0),
            pids: (0..MAX_DOM_ACTIVE_PIDS).map(|_| AtomicI32::new(0)).collect(),
            reader: Mutex::new(()),
        }
    }

    pub fn gen(&self) -> u64 {
        self.gen.load(Ordering::Relaxed)
    }

    // RECORD pid ONCE PER GENERATION. task_gen IS THE TASK'S OWN TAG.
    pub fn record(&self, pid: Pid, task_gen: &mut u64) {
        let gen = self.gen.load(Ordering::Acquire);
        if *task_gen == gen {
            return;
        }
        let idx = self.write_idx.fetch_add(1, Ordering::Relaxed);
        self.pids[(idx % MAX_DOM_ACTIVE_PIDS as u64) as usize].store(pid, Ordering::Relaxed);
        *task_gen = gen;
    }

    // DRAIN EVERYTHING WRITTEN SINCE THE LAST READ AND START A NEW GENERATION
    pub fn snapshot(&self) -> ActiveSnapshot {
        let _guard = self.reader.lock();
        let gen = self.gen.load(Ordering::Acquire);
        let widx = self.write_idx.load(Ordering::Acquire);
        let mut ridx = self.read_idx.swap(widx, Ordering::Relaxed);
        self.gen.fetch_add(1, Ordering::Release);

        let cap = MAX_DOM_ACTIVE_PIDS as u64;
        let wrapped = widx.saturating_sub(ridx) > cap;
        if wrapped {
            ridx = widx - cap;
        }
        let pids = (ridx..widx)
            .map(|i| self.pids[(i % cap) as usize].load(Ordering::Relaxed))
            .collect();
        ActiveSnapshot { gen, pids, wrapped }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BucketLoad {
    pub dcycle: i64,
    // RUNNING AVERAGE OF dcycle, FIXED POINT (RAVG_1 == ONE TASK)
    pub avg: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainLoad {
    pub dom: u32,
    pub buckets: Vec<BucketLoad>,
}

impl DomainLoad {
    // AVERAGE NUMBER OF RUNNABLE TASKS, FIXED POINT
    pub fn dcycle_avg(&self) -> u64 {
        self.buckets.iter().map(|b| b.avg).sum()
    }

    pub fn nr_runnable(&self) -> i64 {
        self.buckets.iter().map(|b| b.dcycle).sum()
    }

    // DUTY CYCLE SCALED BY EACH BUCKET'S MIDPOINT WEIGHT
    pub fn weighted_load(&self) -> f64 {
        self.buckets
            .iter()
            .enumerate()
            .map(|(idx, b)| {
                let weight = idx as f64 * LB_WEIGHT_PER_BUCKET as f64 + LB_WEIGHT_PER_BUCKET as f64 / 2.0;
                b.avg as f64 / RAVG_1 as f64 * weight
            })
            .sum()
    }
}

pub struct Domain {
    pub id: u32,
    pub node: u32,
    pub cpumask: Cpumask,
    pub node_cpumask: Cpumask,
    pub direct_greedy: AtomicCpumask,
    vtime_now: AtomicU64,
    buckets: Box<[Mutex<LoadBucket>]>,
    pub active: ActiveTasks,
    pub dsq: DispatchQueue,
    // LAST TIME THE DEBUG DCYCLE TRACE FIRED
    pub dbg_dcycle_printed_at: AtomicU64,
}

impl Domain {
    pub fn new(id: u32, node: u32, cpumask: Cpumask, node_cpumask: Cpumask) -> Self {
        Self {
            id,
            node,
            cpumask,
            node_cpumask,
            direct_greedy: AtomicCpumask::new(),
            vtime_now: AtomicU64::new(0),
            buckets: (0..LB_LOAD_BUCKETS)
                .map(|_| Mutex::new(LoadBucket::default()))
                .collect(),
            active: ActiveTasks::new(),
            dsq: DispatchQueue::new(),
            dbg_dcycle_printed_at: AtomicU64::new(0),
        }
    }

    pub fn vtime_now(&self) -> u64 {
        self.vtime_now.load(Ordering::Relaxed)
    }

    // MOVE THE CLOCK FORWARD TO vtime IF LATER. LOSERS OF THE RACE RETRY
    // AGAINST THE NEW VALUE; NOBODY CAN PULL THE CLOCK BACK.
    pub fn advance_vtime(&self, vtime: u64) {
        let _ = self
            .vtime_now
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                vtime_before(cur, vtime).then_some(vtime)
            });
    }

    pub fn bucket(&self, idx: usize) -> &Mutex<LoadBucket> {
        &self.buckets[idx.min(LB_LOAD_BUCKETS - 1)]
    }

    pub fn load(&self, now: u64, half_life: u64) -> DomainLoad {
        let buckets = self
            .buckets
            .iter()
            .map(|b| {
                let b = b.lock();
                BucketLoad {
                    dcycle: b.dcycle,
                    avg: b.rd.read(now, half_life),
                }
            })
            .collect();
        DomainLoad { dom: self.id, buckets }
    }
}
