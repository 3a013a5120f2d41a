// MULTIDOM CONSTANTS
// HARD CAPACITY BOUNDS, LOAD BUCKETING, TIME UNITS.
// BITMASK OPERATIONS RUN OVER FIXED-WIDTH WORDS, SO EVERY LOOP IN THE
// HOT PATHS IS BOUNDED BY THESE VALUES.

pub type Pid = i32;

pub const MAX_CPUS: usize = 512;
pub const MAX_DOMS: usize = 64;       // ONE u64 OF DOMAIN BITS PER TASK
pub const MAX_NUMA_NODES: usize = MAX_DOMS;
pub const NO_DOM_FOUND: u32 = MAX_DOMS as u32 + 1;

// CPU-TO-DOMAIN MAP VALUE FOR A CPU THAT BELONGS TO NO DOMAIN
pub const OFFLINE_CPU_DOM: u32 = u32::MAX;

pub const LB_DEFAULT_WEIGHT: u32 = 100;
pub const LB_MIN_WEIGHT: u32 = 1;
pub const LB_MAX_WEIGHT: u32 = 10000;
pub const LB_LOAD_BUCKETS: usize = 100;  // MUST DIVIDE LB_MAX_WEIGHT
pub const LB_WEIGHT_PER_BUCKET: u32 = LB_MAX_WEIGHT / LB_LOAD_BUCKETS as u32;

// THE BALANCER ONLY LOOKS AT THIS MANY RECENTLY ACTIVE TASKS PER DOMAIN.
// OLDER ENTRIES ARE OVERWRITTEN; A MISSED VICTIM IS RETRIED NEXT ROUND.
pub const MAX_DOM_ACTIVE_PIDS: usize = 1024;

pub const MSEC_PER_SEC: u64 = 1000;
pub const USEC_PER_MSEC: u64 = 1000;
pub const NSEC_PER_USEC: u64 = 1000;
pub const NSEC_PER_MSEC: u64 = USEC_PER_MSEC * NSEC_PER_USEC;
pub const USEC_PER_SEC: u64 = USEC_PER_MSEC * MSEC_PER_SEC;
pub const NSEC_PER_SEC: u64 = NSEC_PER_USEC * USEC_PER_SEC;

pub const SLICE_DFL_NS: u64 = 20 * NSEC_PER_MSEC;
pub const LOAD_HALF_LIFE_DFL_NS: u64 = NSEC_PER_SEC;

// FREQUENCY TRACKERS REPORT EVENTS PER 100MS, CAPPED FOR LATENCY SCORING
pub const FREQ_WINDOW_NS: u64 = 100 * NSEC_PER_MSEC;
pub const DL_FREQ_FT_MAX: u64 = 100_000;

// EXIT CODE BIT ASKING THE OWNER TO REBUILD THE SCHEDULER
pub const ECODE_RESTART: u64 = 1 << 16;
