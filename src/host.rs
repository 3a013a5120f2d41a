// MULTIDOM HOST BOUNDARY
// THE TWO THINGS THE CORE NEEDS FROM WHATEVER EXECUTES TASKS:
// A MONOTONIC CLOCK AND A WAY TO POKE A CPU INTO RESCHEDULING.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::consts::MAX_CPUS;

pub trait Host: Send + Sync {
    fn now_ns(&self) -> u64;
    fn kick_cpu(&self, cpu: u32);
}

// REAL CLOCK. KICKS LATCH A PER-CPU FLAG THE EXECUTOR POLLS.
pub struct SystemHost {
    kicks: Box<[AtomicBool]>,
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            kicks: (0..MAX_CPUS).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    // TRUE IF cpu WAS KICKED SINCE THE LAST CALL
    pub fn take_kick(&self, cpu: u32) -> bool {
        self.kicks
            .get(cpu as usize)
            .is_some_and(|k| k.swap(false, Ordering::AcqRel))
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for SystemHost {
    fn now_ns(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }

    fn kick_cpu(&self, cpu: u32) {
        if let Some(k) = self.kicks.get(cpu as usize) {
            k.store(true, Ordering::Release);
        }
    }
}

// SIMULATED CLOCK FOR THE SIMULATOR AND TESTS. RECORDS EVERY KICK.
#[derive(Default)]
pub struct ManualHost {
    now: AtomicU64,
    kicks: Mutex<Vec<u32>>,
}

impl ManualHost {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
            kicks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_now(&self, ns: u64) {
        self.now.store(ns, Ordering::Relaxed);
    }

    pub fn advance(&self, ns: u64) -> u64 {
        self.now.fetch_add(ns, Ordering::Relaxed) + ns
    }

    pub fn take_kicks(&self) -> Vec<u32> {
        std::mem::take(&mut *self.kicks.lock())
    }
}

impl Host for ManualHost {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn kick_cpu(&self, cpu: u32) {
        self.kicks.lock().push(cpu);
    }
}
