// MULTIDOM v1.0.0 -- MULTI-DOMAIN CPU SCHEDULING CORE
// PER-DOMAIN VTIME FAIRNESS, DUTY-CYCLE LOAD TRACKING, GREEDY STEALING
//
// THE CORE LIVES IN THE LIBRARY. THIS BINARY DISCOVERS OR BUILDS A
// TOPOLOGY, DRIVES THE CORE WITH A SIMULATED WORKLOAD AND REPORTS.

mod cli;
mod logger;

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};

use cli::Opts;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "multidom")]
#[command(about = "MULTIDOM -- MULTI-DOMAIN CPU SCHEDULING CORE")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    opts: Opts,

    // -v DEBUG, -vv TRACE
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    // RUN THE SIMULATOR (DEFAULT)
    Run(Opts),
    // PRINT THE TOPOLOGY AND EXIT
    Topology(Opts),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let opts = match cli.command {
        Some(Command::Topology(opts)) => return cli::topology::run_topology(&opts),
        Some(Command::Run(opts)) => opts,
        None => cli.opts,
    };

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let opts = &opts;
    println!("MULTIDOM v1.0.0");
    println!("SLICE:           {} ns", opts.slice_ns);
    println!("HALF-LIFE:       {} ns", opts.load_half_life_ns);
    println!("ORDERING:        {}", if opts.fifo_sched { "fifo" } else { "vtime" });
    println!("GREEDY:          local={} x_numa={} numa_direct={}",
             opts.greedy_threshold, opts.greedy_threshold_x_numa, opts.direct_greedy_numa);
    println!("WORKLOAD:        {} tasks, run {}us, sleep {}us", opts.tasks, opts.run_us, opts.sleep_us);
    println!();

    let mut first = true;
    loop {
        let should_restart = cli::run::run_session(opts, first, &SHUTDOWN)?;
        first = false;

        if !should_restart || SHUTDOWN.load(Ordering::Relaxed) {
            break;
        }

        println!("RESTARTING MULTIDOM...\n");
    }

    println!("MULTIDOM OUT.");
    Ok(())
}
