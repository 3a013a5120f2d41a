// MULTIDOM TOPOLOGY DISCOVERY
// READS THE HOST'S CPU LAYOUT FROM SYSFS AND TURNS IT INTO A TopologyInput.
// ONE DOMAIN PER LAST-LEVEL CACHE; ONE DOMAIN PER NODE WHEN CACHE INFO IS
// MISSING. A ROOT OTHER THAN "/" LETS TESTS POINT AT A FAKE TREE.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::consts::{MAX_CPUS, MAX_DOMS};
use crate::cpumask::Cpumask;
use crate::topology::TopologyInput;

const CPU_DIR: &str = "sys/devices/system/cpu";
const NODE_DIR: &str = "sys/devices/system/node";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainSplit {
    // ONE DOMAIN PER LAST-LEVEL CACHE
    Llc,
    // ONE DOMAIN PER NUMA NODE
    Node,
}

fn read_cpulist(path: &Path) -> Result<Cpumask> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Cpumask::parse_cpulist(raw.trim()).with_context(|| format!("parsing {}", path.display()))
}

fn cpu_path(root: &Path, cpu: u32, rest: &str) -> PathBuf {
    root.join(CPU_DIR).join(format!("cpu{cpu}")).join(rest)
}

// POSSIBLE CPU COUNT: HIGHEST CPU IN .../cpu/possible PLUS ONE
pub fn nr_possible_cpus(root: &Path) -> Result<u32> {
    let possible = read_cpulist(&root.join(CPU_DIR).join("possible"))?;
    let Some(last) = possible.iter().last() else {
        bail!("no possible cpus");
    };
    Ok(last + 1)
}

pub fn online_cpus(root: &Path) -> Result<Cpumask> {
    read_cpulist(&root.join(CPU_DIR).join("online"))
}

// NODE CPU LISTS, INDEXED BY NODE ID. A HOST WITHOUT NUMA INFO IS ONE NODE.
fn node_cpumasks(root: &Path, online: &Cpumask) -> Result<Vec<Cpumask>> {
    let dir = root.join(NODE_DIR);
    let mut nodes: Vec<(u32, Cpumask)> = Vec::new();

    if let Ok(entries) = fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_prefix("node")).and_then(|n| n.parse().ok()) else {
                continue;
            };
            let mask = read_cpulist(&entry.path().join("cpulist"))?.and(online);
            nodes.push((id, mask));
        }
    }

    if nodes.is_empty() {
        debug!("no numa nodes under {}, assuming one", dir.display());
        return Ok(vec![*online]);
    }
    nodes.sort_by_key(|(id, _)| *id);
    Ok(nodes.into_iter().map(|(_, m)| m).collect())
}

// LARGEST SHARED CACHE LEVEL PER CPU: THE HIGHEST indexN WITH A shared_cpu_list
fn llc_cpumask(root: &Path, cpu: u32) -> Option<Cpumask> {
    (0..8)
        .rev()
        .find_map(|idx| read_cpulist(&cpu_path(root, cpu, &format!("cache/index{idx}/shared_cpu_list"))).ok())
}

fn group_domains(root: &Path, online: &Cpumask, nodes: &[Cpumask], split: DomainSplit) -> Vec<Cpumask> {
    let mut doms: Vec<Cpumask> = Vec::new();
    if split == DomainSplit::Llc {
        let mut claimed = Cpumask::new();
        for cpu in online.iter() {
            if claimed.test(cpu) {
                continue;
            }
            let Some(llc) = llc_cpumask(root, cpu) else {
                warn!("cpu{cpu}: no cache info, falling back to node domains");
                doms.clear();
                break;
            };
            // AN LLC NEVER SPANS NODES HERE; SPLIT IT IF SYSFS DISAGREES
            let node = nodes.iter().find(|n| n.test(cpu)).copied().unwrap_or(*online);
            let dom = llc.and(online).and(&node).and_not(&claimed).or(&Cpumask::from_cpus([cpu]));
            claimed = claimed.or(&dom);
            doms.push(dom);
        }
        if !doms.is_empty() {
            return doms;
        }
    }
    nodes.iter().filter(|n| !n.is_empty()).copied().collect()
}

pub fn discover_at(root: &Path, split: DomainSplit) -> Result<TopologyInput> {
    let nr_cpus = nr_possible_cpus(root)?;
    if nr_cpus as usize > MAX_CPUS {
        bail!("{nr_cpus} possible cpus exceeds the supported {MAX_CPUS}");
    }
    let online = online_cpus(root)?;
    let nodes = node_cpumasks(root, &online)?;

    let dom_cpumasks = group_domains(root, &online, &nodes, split);
    if dom_cpumasks.len() > MAX_DOMS {
        bail!("{} domains exceeds the supported {MAX_DOMS}", dom_cpumasks.len());
    }
    let dom_node: Vec<u32> = dom_cpumasks
        .iter()
        .map(|d| {
            d.first()
                .and_then(|cpu| nodes.iter().position(|n| n.test(cpu)))
                .unwrap_or(0) as u32
        })
        .collect();

    let mut input = TopologyInput::from_domains(nr_cpus, dom_cpumasks, dom_node);
    input.node_cpumasks = nodes;
    input.core_siblings = (0..nr_cpus)
        .map(|cpu| {
            read_cpulist(&cpu_path(root, cpu, "topology/thread_siblings_list"))
                .map(|m| m.or(&Cpumask::from_cpus([cpu])))
                .unwrap_or_else(|_| Cpumask::from_cpus([cpu]))
        })
        .collect();

    debug!(
        "sysfs: {} cpus, {} online, {} nodes, {} domains",
        nr_cpus,
        online.weight(),
        input.node_cpumasks.len(),
        input.dom_cpumasks.len()
    );
    Ok(input)
}

pub fn discover(split: DomainSplit) -> Result<TopologyInput> {
    discover_at(Path::new("/"), split)
}
