// TOPOLOGY REPORT -- PRINTS THE DOMAIN LAYOUT THE CORE WOULD RUN WITH

use anyhow::Result;

use multidom::topology::Topology;

use super::Opts;

pub fn run_topology(opts: &Opts) -> Result<()> {
    let topo = Topology::build(opts.topology_input()?)?;

    println!("MULTIDOM TOPOLOGY");
    println!("CPUS:            {} ({} in domains)", topo.nr_cpus, topo.all_cpumask().weight());
    println!("DOMAINS:         {}", topo.nr_doms);
    println!("NUMA NODES:      {}", topo.nr_nodes);
    println!();

    println!("{:<6} {:<6} {:<6} {:<24} {}", "DOM", "NODE", "CPUS", "CPULIST", "NODE SIBLINGS");
    println!("{}", "-".repeat(64));
    for dom in 0..topo.nr_doms {
        let Some(mask) = topo.dom_cpumask(dom) else {
            continue;
        };
        let siblings = mask
            .first()
            .map(|cpu| {
                let doms = topo.node_sibling_doms(cpu);
                if doms.is_empty() {
                    "-".to_string()
                } else {
                    doms.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(",")
                }
            })
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<6} {:<6} {:<24} {}",
            dom,
            topo.dom_node(dom).unwrap_or(0),
            mask.weight(),
            mask.to_string(),
            siblings
        );
    }

    let offline: Vec<String> = (0..topo.nr_cpus)
        .filter(|&cpu| topo.is_offline_cpu(cpu))
        .map(|cpu| cpu.to_string())
        .collect();
    if !offline.is_empty() {
        println!();
        println!("OUTSIDE EVERY DOMAIN: {}", offline.join(" "));
    }

    let smt = (0..topo.nr_cpus).any(|cpu| topo.core_siblings(cpu).is_some_and(|m| m.weight() > 1));
    println!();
    println!("SMT:             {}", if smt { "yes" } else { "no" });

    Ok(())
}
