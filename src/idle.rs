// MULTIDOM IDLE TRACKING
// THE EXECUTION SUBSTRATE PUBLISHES CPU IDLE STATE HERE. SELECTION CLAIMS
// IDLE CPUS BY ATOMICALLY CLEARING THEIR BIT, SO TWO WAKERS RACING FOR THE
// SAME CPU CANNOT BOTH WIN.
//
// idle:     CPUS WITH NOTHING TO RUN
// idle_smt: CPUS WHOSE WHOLE PHYSICAL CORE IS IDLE

use std::sync::atomic::{AtomicU32, Ordering};

use crate::cpumask::{AtomicCpumask, Cpumask};

pub struct IdleTracker {
    idle: AtomicCpumask,
    idle_smt: AtomicCpumask,
    siblings: Vec<Cpumask>,
    // ROTATES pick_any_cpu FALLBACKS ACROSS THE MASK
    any_cursor: AtomicU32,
}

impl IdleTracker {
    pub fn new(siblings: Vec<Cpumask>) -> Self {
        Self {
            idle: AtomicCpumask::new(),
            idle_smt: AtomicCpumask::new(),
            siblings,
            any_cursor: AtomicU32::new(0),
        }
    }

    fn siblings_of(&self, cpu: u32) -> Cpumask {
        self.siblings
            .get(cpu as usize)
            .copied()
            .unwrap_or_else(|| Cpumask::from_cpus([cpu]))
    }

    pub fn set_cpu_idle(&self, cpu: u32, idle: bool) {
        let sib = self.siblings_of(cpu);
        if idle {
            self.idle.set_cpu(cpu);
            if sib.iter().all(|c| self.idle.test_cpu(c)) {
                for c in sib.iter() {
                    self.idle_smt.set_cpu(c);
                }
            }
        } else {
            self.idle.clear_cpu(cpu);
            for c in sib.iter() {
                self.idle_smt.clear_cpu(c);
            }
        }
    }

    pub fn is_idle(&self, cpu: u32) -> bool {
        self.idle.test_cpu(cpu)
    }

    pub fn idle_mask(&self) -> Cpumask {
        self.idle.snapshot()
    }

    pub fn idle_smt_mask(&self) -> Cpumask {
        self.idle_smt.snapshot()
    }

    pub fn has_idle_cores(&self) -> bool {
        !self.idle_smt.is_empty()
    }

    // CLAIM cpu. A CLAIMED CPU'S CORE IS NO LONGER WHOLLY IDLE.
    pub fn test_and_clear_cpu_idle(&self, cpu: u32) -> bool {
        if !self.idle.test_and_clear_cpu(cpu) {
            return false;
        }
        for c in self.siblings_of(cpu).iter() {
            self.idle_smt.clear_cpu(c);
        }
        true
    }

    // CLAIM AN IDLE CPU IN mask. WITH core, ONLY CPUS ON A WHOLLY IDLE CORE.
    pub fn pick_idle_cpu(&self, mask: &Cpumask, core: bool) -> Option<u32> {
        let source = if core { &self.idle_smt } else { &self.idle };
        // EACH LOST RACE REMOVES ONE CANDIDATE, SO THIS TERMINATES
        loop {
            let cpu = source.snapshot().and(mask).first()?;
            if self.test_and_clear_cpu_idle(cpu) {
                return Some(cpu);
            }
            if core {
                // LOST THE CPU BUT THE CORE BIT MAY STILL BE SET
                self.idle_smt.clear_cpu(cpu);
            }
        }
    }

    // AN IDLE CPU IF ANY, ELSE SOME CPU OF THE MASK
    pub fn pick_any_cpu(&self, mask: &Cpumask) -> Option<u32> {
        if let Some(cpu) = self.pick_idle_cpu(mask, false) {
            return Some(cpu);
        }
        let start = self.any_cursor.fetch_add(1, Ordering::Relaxed);
        mask.next_wrapping(start)
    }
}
