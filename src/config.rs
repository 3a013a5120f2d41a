// MULTIDOM CONFIGURATION
// READ-ONLY AFTER INIT. THE BINARY MAPS CLI FLAGS ONTO THIS.

use thiserror::Error;

use crate::consts::{LOAD_HALF_LIFE_DFL_NS, NSEC_PER_SEC, NSEC_PER_USEC, SLICE_DFL_NS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("slice_ns {0} outside [{min}, {max}]", min = NSEC_PER_USEC, max = NSEC_PER_SEC)]
    Slice(u64),
    #[error("load_half_life_ns must be non-zero")]
    HalfLife,
}

#[derive(Clone, Debug)]
pub struct SchedConfig {
    // SCHEDULING SLICE, ALSO THE MAX VTIME A WAKING TASK MAY LAG ITS DOMAIN
    pub slice_ns: u64,
    pub load_half_life_ns: u64,
    // FIFO DOMAIN QUEUES INSTEAD OF VTIME-ORDERED
    pub fifo_sched: bool,
    // DISPATCH PINNED KTHREADS STRAIGHT TO THEIR CPU
    pub kthreads_local: bool,
    // ONLY TASKS THAT OPTED IN ARE SCHEDULED BY THE CORE
    pub switch_partial: bool,
    // ALLOW DIRECT-GREEDY PICKS ACROSS NUMA NODES
    pub direct_greedy_numa: bool,
    // 0 DISABLES STEALING FROM SIBLING DOMAINS ON THE SAME NODE
    pub greedy_threshold: u32,
    // 0 DISABLES CROSS-NODE STEALING; OTHERWISE THE MIN QUEUE DEPTH TO STEAL FROM
    pub greedy_threshold_x_numa: u32,
    // >= 2 ENABLES PER-EVENT TRACES
    pub debug: u32,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            slice_ns: SLICE_DFL_NS,
            load_half_life_ns: LOAD_HALF_LIFE_DFL_NS,
            fifo_sched: false,
            kthreads_local: false,
            switch_partial: false,
            direct_greedy_numa: false,
            greedy_threshold: 1,
            greedy_threshold_x_numa: 0,
            debug: 0,
        }
    }
}

impl SchedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(NSEC_PER_USEC..=NSEC_PER_SEC).contains(&self.slice_ns) {
            return Err(ConfigError::Slice(self.slice_ns));
        }
        if self.load_half_life_ns == 0 {
            return Err(ConfigError::HalfLife);
        }
        Ok(())
    }
}
