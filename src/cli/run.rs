// SIMULATION RUN -- ONE SCHEDULER LIFETIME
// BUILDS THE CORE, DRIVES THE WORKLOAD ONE SIMULATED SECOND PER TICK AND
// PRINTS WHAT EACH SECOND LOOKED LIKE. RETURNS TRUE WHEN THE CORE ASKED TO
// BE REBUILT (HOT-PLUG).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use log::warn;

use multidom::consts::{NSEC_PER_MSEC, NSEC_PER_SEC};
use multidom::event::EventLog;
use multidom::host::{Host, SystemHost};
use multidom::sim::{Simulator, TickReport};
use multidom::stats::Stat;

use super::Opts;

fn print_header(nr_doms: u32) {
    print!("{:<6} {:<8} {:<7} {:<7} {:<7} {:<7} {:<7} {:<6}",
        "TIME", "DISPATCH", "DIRECT", "DSQ", "GREEDY", "XNUMA", "KICKS", "CLAMP");
    for dom in 0..nr_doms {
        print!(" {:<14}", format!("DOM{dom} RUN/Q/%"));
    }
    println!();
}

fn print_tick(r: &TickReport) {
    let s = &r.stats;
    let direct = s.get(Stat::PrevIdle)
        + s.get(Stat::DirectDispatch)
        + s.get(Stat::WakeSync)
        + s.get(Stat::Pinned);
    let greedy = s.get(Stat::GreedyLocal) + s.get(Stat::DirectGreedy) + s.get(Stat::DirectGreedyFar);
    print!("{:<6} {:<8} {:<7} {:<7} {:<7} {:<7} {:<7} {:<6}",
        format!("{}s", r.now_ns / NSEC_PER_SEC),
        s.total_dispatched(), direct, s.get(Stat::DsqDispatch), greedy,
        s.get(Stat::GreedyXnuma), r.kicks, s.get(Stat::DlClamp));
    for (i, run) in r.dom_runnable.iter().enumerate() {
        let queued = r.dom_queued.get(i).copied().unwrap_or(0);
        let util = r.dom_util_pct.get(i).copied().unwrap_or(0);
        print!(" {:<14}", format!("{run}/{queued}/{util}"));
    }
    println!();
}

// WAIT NEEDED SO THAT TICK secs ENDS secs WALL SECONDS AFTER started_ns
fn pace_delay(started_ns: u64, secs: u64, now_ns: u64) -> Option<Duration> {
    let due = started_ns.saturating_add(secs.saturating_mul(NSEC_PER_SEC));
    (due > now_ns).then(|| Duration::from_nanos(due - now_ns))
}

pub fn run_session(opts: &Opts, first: bool, shutdown: &AtomicBool) -> Result<bool> {
    let mut sim = Simulator::new(opts.topology_input()?, opts.sched_config(), opts.workload())?;
    let mut log = EventLog::new();
    let nr_doms = sim.scheduler().topology().nr_doms;
    let hotplug_at = if first { opts.hotplug_at } else { None };

    println!("MULTIDOM IS ACTIVE (CTRL+C TO EXIT)");
    print_header(nr_doms);

    let wall = SystemHost::new();
    let started = wall.now_ns();
    let mut secs = 0u64;
    let should_restart = loop {
        if shutdown.load(Ordering::Relaxed) || (opts.duration > 0 && secs >= opts.duration) {
            break false;
        }

        let report = sim.run_tick();
        secs += 1;
        print_tick(&report);
        let runnable = report.dom_runnable.iter().sum();
        let queued = report.dom_queued.iter().map(|&q| q as u64).sum();
        log.snapshot(report.now_ns, report.stats, runnable, queued);

        if opts.realtime {
            if let Some(wait) = pace_delay(started, secs, wall.now_ns()) {
                std::thread::sleep(wait);
            }
        }

        if hotplug_at == Some(secs) {
            let cpu = sim.scheduler().topology().all_cpumask().iter().last().unwrap_or(0);
            warn!("simulating cpu {cpu} going offline");
            sim.scheduler().on_cpu_offline(cpu);
        }

        if let Some(exit) = sim.scheduler().exit_info() {
            if exit.should_restart() {
                println!("EXIT: {} (code {:#x})", exit.reason, exit.code);
                break true;
            }
            log.summary();
            bail!("scheduler exited: {}", exit.reason);
        }
    };

    println!("MULTIDOM IS SHUTTING DOWN");
    println!("SIMULATED {secs}s IN {}ms WALL", wall.now_ns().saturating_sub(started) / NSEC_PER_MSEC);
    if opts.dump_log {
        log.dump();
    }
    log.summary();

    let loads = sim.scheduler().dom_dcycle_snapshot();
    println!();
    println!("{:<6} {:<10} {:<12}", "DOM", "RUNNABLE", "LOAD");
    for l in &loads {
        println!("{:<6} {:<10} {:<12.2}", l.dom, l.nr_runnable(), l.weighted_load());
    }

    Ok(should_restart)
}
