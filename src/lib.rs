// MULTIDOM -- MULTI-DOMAIN CPU SCHEDULING CORE
//
// DECIDES, FOR EVERY RUNNABLE TASK, WHICH DOMAIN AND WHICH CPU RUNS IT.
// PER-DOMAIN VIRTUAL-TIME FAIRNESS, DECAYING DUTY-CYCLE ACCOUNTING, AND
// OPPORTUNISTIC WORK STEALING ACROSS DOMAIN AND NUMA BOUNDARIES.
// AN EXTERNAL BALANCER READS THE MEASUREMENTS AND WRITES MIGRATION HINTS.

pub mod consts;
pub mod cpumask;
pub mod ravg;
pub mod topology;
pub mod domain;
pub mod dsq;
pub mod idle;
pub mod host;
pub mod task;
pub mod stats;
pub mod error;
pub mod config;
pub mod tune;
pub mod scheduler;
pub mod balancer;
pub mod tuning;
pub mod event;
pub mod sysfs;
pub mod sim;

mod assign;
mod dcycle;
mod enqueue;
mod select;

pub use dcycle::weight_to_bucket_idx;
