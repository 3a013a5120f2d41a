// MULTIDOM TUNER
// THE BALANCER PUBLISHES {gen, direct_greedy, kick_greedy}. THE HOT PATH
// NOTICES A NEW gen ON ITS NEXT SELECTION AND COPIES THE MASKS INTO THE
// GLOBAL SETS AND EACH DOMAIN'S DIRECT-GREEDY SET, BIT BY BIT.
// READERS MAY SEE A HALF-APPLIED UPDATE; THE NEXT ONE FIXES IT.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::cpumask::{AtomicCpumask, Cpumask};
use crate::host::Host;
use crate::scheduler::Scheduler;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TuneInput {
    pub gen: u64,
    pub direct_greedy: Cpumask,
    pub kick_greedy: Cpumask,
}

pub struct Tuner {
    input: Mutex<TuneInput>,
    input_gen: AtomicU64,
    applied_gen: AtomicU64,
    pub direct_greedy: AtomicCpumask,
    pub kick_greedy: AtomicCpumask,
}

impl Tuner {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(TuneInput::default()),
            input_gen: AtomicU64::new(0),
            applied_gen: AtomicU64::new(0),
            direct_greedy: AtomicCpumask::new(),
            kick_greedy: AtomicCpumask::new(),
        }
    }

    // BALANCER SIDE. RETURNS THE NEW GENERATION.
    pub fn write(&self, direct_greedy: Cpumask, kick_greedy: Cpumask) -> u64 {
        let mut input = self.input.lock();
        input.gen += 1;
        input.direct_greedy = direct_greedy;
        input.kick_greedy = kick_greedy;
        self.input_gen.store(input.gen, Ordering::Release);
        input.gen
    }

    pub fn applied_gen(&self) -> u64 {
        self.applied_gen.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> bool {
        self.input_gen.load(Ordering::Acquire) != self.applied_gen()
    }
}

impl Default for Tuner {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Host> Scheduler<H> {
    pub fn refresh_tune_params(&self) {
        if !self.tuner.pending() {
            return;
        }
        // SOMEONE ELSE IS EITHER WRITING OR APPLYING; CATCH IT NEXT TIME
        let Some(input) = self.tuner.input.try_lock() else {
            return;
        };
        if input.gen == self.tuner.applied_gen() {
            return;
        }

        for cpu in 0..self.topo.nr_cpus {
            let Some(domc) = self.domain(self.topo.cpu_to_dom(cpu)) else {
                continue;
            };

            if input.direct_greedy.test(cpu) {
                self.tuner.direct_greedy.set_cpu(cpu);
                domc.direct_greedy.set_cpu(cpu);
            } else {
                self.tuner.direct_greedy.clear_cpu(cpu);
                domc.direct_greedy.clear_cpu(cpu);
            }

            if input.kick_greedy.test(cpu) {
                self.tuner.kick_greedy.set_cpu(cpu);
            } else {
                self.tuner.kick_greedy.clear_cpu(cpu);
            }
        }
        self.tuner.applied_gen.store(input.gen, Ordering::Release);
    }

    pub fn direct_greedy_mask(&self) -> Cpumask {
        self.tuner.direct_greedy.snapshot()
    }

    pub fn kick_greedy_mask(&self) -> Cpumask {
        self.tuner.kick_greedy.snapshot()
    }
}
