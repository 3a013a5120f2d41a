// MULTIDOM COMMAND LINE
// SHARED OPTIONS: WHERE THE TOPOLOGY COMES FROM, HOW THE CORE IS CONFIGURED,
// AND WHAT THE SIMULATED WORKLOAD LOOKS LIKE.

pub mod run;
pub mod topology;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};

use multidom::config::SchedConfig;
use multidom::consts::{LOAD_HALF_LIFE_DFL_NS, NSEC_PER_USEC, SLICE_DFL_NS};
use multidom::cpumask::Cpumask;
use multidom::sim::Workload;
use multidom::sysfs::{self, DomainSplit};
use multidom::topology::TopologyInput;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Split {
    Llc,
    Node,
}

impl From<Split> for DomainSplit {
    fn from(s: Split) -> Self {
        match s {
            Split::Llc => DomainSplit::Llc,
            Split::Node => DomainSplit::Node,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct Opts {
    // DOMAIN CPU LISTS, ONE PER DOMAIN (--cpumasks 0-3 --cpumasks 4-7)
    #[arg(long)]
    pub cpumasks: Vec<String>,

    // SYNTHETIC TOPOLOGY: THIS MANY CPUS SPLIT INTO --nr-doms DOMAINS
    #[arg(long, conflicts_with = "cpumasks")]
    pub uniform: Option<u32>,

    // DOMAIN COUNT FOR --uniform
    #[arg(long, default_value_t = 2)]
    pub nr_doms: u32,

    // DOMAINS PER NUMA NODE FOR --cpumasks / --uniform
    #[arg(long, default_value_t = 1)]
    pub doms_per_node: u32,

    // PAIR CPUS (2k, 2k+1) AS SMT SIBLINGS FOR --cpumasks / --uniform
    #[arg(long)]
    pub smt: bool,

    // HOW SYSFS DISCOVERY GROUPS CPUS INTO DOMAINS
    #[arg(long, value_enum, default_value_t = Split::Llc)]
    pub split: Split,

    // SCHEDULING SLICE IN NANOSECONDS (20MS DEFAULT)
    #[arg(long, default_value_t = SLICE_DFL_NS)]
    pub slice_ns: u64,

    // DUTY-CYCLE HALF-LIFE IN NANOSECONDS (1S DEFAULT)
    #[arg(long, default_value_t = LOAD_HALF_LIFE_DFL_NS)]
    pub load_half_life_ns: u64,

    // FIFO DOMAIN QUEUES INSTEAD OF VTIME ORDER
    #[arg(long)]
    pub fifo_sched: bool,

    // DISPATCH PINNED KTHREADS STRAIGHT TO THEIR CPU
    #[arg(long)]
    pub kthreads_local: bool,

    // ONLY SCHEDULE TASKS THAT OPTED IN
    #[arg(long)]
    pub partial: bool,

    // LET DIRECT-GREEDY PICKS CROSS NUMA NODES
    #[arg(long)]
    pub direct_greedy_numa: bool,

    // SAME-NODE STEALING (0 DISABLES)
    #[arg(long, default_value_t = 1)]
    pub greedy_threshold: u32,

    // CROSS-NODE STEALING MIN QUEUE DEPTH (0 DISABLES)
    #[arg(long, default_value_t = 0)]
    pub greedy_threshold_x_numa: u32,

    // CORE DEBUG LEVEL (2+ TRACES PER-EVENT DECISIONS)
    #[arg(long, default_value_t = 0)]
    pub debug: u32,

    // SIMULATED TASKS
    #[arg(long, default_value_t = 32)]
    pub tasks: u32,

    // MEAN CPU BURST PER TASK IN MICROSECONDS
    #[arg(long, default_value_t = 2000)]
    pub run_us: u64,

    // MEAN SLEEP PER TASK IN MICROSECONDS
    #[arg(long, default_value_t = 3000)]
    pub sleep_us: u64,

    // DISABLE CHAINED SYNC WAKEUPS
    #[arg(long)]
    pub no_sync: bool,

    // SIMULATED SECONDS TO RUN (0: UNTIL CTRL+C)
    #[arg(long, default_value_t = 10)]
    pub duration: u64,

    // TAKE A CPU OFFLINE AFTER THIS MANY SIMULATED SECONDS (FIRST RUN ONLY)
    #[arg(long)]
    pub hotplug_at: Option<u64>,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    pub dump_log: bool,

    // PACE ONE SIMULATED SECOND PER WALL-CLOCK SECOND
    #[arg(long)]
    pub realtime: bool,
}

impl Opts {
    pub fn sched_config(&self) -> SchedConfig {
        SchedConfig {
            slice_ns: self.slice_ns,
            load_half_life_ns: self.load_half_life_ns,
            fifo_sched: self.fifo_sched,
            kthreads_local: self.kthreads_local,
            switch_partial: self.partial,
            direct_greedy_numa: self.direct_greedy_numa,
            greedy_threshold: self.greedy_threshold,
            greedy_threshold_x_numa: self.greedy_threshold_x_numa,
            debug: self.debug,
        }
    }

    pub fn workload(&self) -> Workload {
        Workload {
            nr_tasks: self.tasks,
            run_ns: self.run_us * NSEC_PER_USEC,
            sleep_ns: self.sleep_us * NSEC_PER_USEC,
            sync_wakeups: !self.no_sync,
            ..Workload::default()
        }
    }

    // --cpumasks, THEN --uniform, THEN SYSFS
    pub fn topology_input(&self) -> Result<TopologyInput> {
        let doms_per_node = self.doms_per_node.max(1);
        let input = if !self.cpumasks.is_empty() {
            let masks = self
                .cpumasks
                .iter()
                .map(|s| Cpumask::parse_cpulist(s).with_context(|| format!("--cpumasks {s}")))
                .collect::<Result<Vec<_>>>()?;
            let Some(nr_cpus) = masks.iter().filter_map(|m| m.iter().last()).max().map(|c| c + 1) else {
                bail!("--cpumasks: every domain is empty");
            };
            let dom_node = (0..masks.len() as u32).map(|d| d / doms_per_node).collect();
            TopologyInput::from_domains(nr_cpus, masks, dom_node)
        } else if let Some(nr_cpus) = self.uniform {
            if nr_cpus == 0 || self.nr_doms == 0 || self.nr_doms > nr_cpus {
                bail!("--uniform {nr_cpus} cannot hold {} domains", self.nr_doms);
            }
            TopologyInput::uniform(nr_cpus, self.nr_doms, doms_per_node)
        } else {
            return sysfs::discover(self.split.into()).context("topology discovery");
        };

        Ok(if self.smt { input.with_smt_pairs() } else { input })
    }
}
