// MULTIDOM TOPOLOGY
// STATIC CPU/DOMAIN/NUMA LAYOUT, VALIDATED ONCE AT STARTUP.
//
// THE INPUT COMES FROM OUTSIDE THE CORE (SYSFS DISCOVERY, CLI, TESTS).
// Topology::build() REJECTS ANYTHING THE HOT PATHS CANNOT HANDLE WITH
// FIXED-WIDTH MASKS: TOO MANY CPUS/DOMAINS/NODES, DANGLING IDS, AND MAPS
// THAT DISAGREE WITH THE MASKS.

use thiserror::Error;

use crate::consts::{MAX_CPUS, MAX_DOMS, MAX_NUMA_NODES, OFFLINE_CPU_DOM};
use crate::cpumask::Cpumask;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("no domains configured")]
    NoDomains,
    #[error("{0} cpus exceed the {max} cpu limit", max = MAX_CPUS)]
    TooManyCpus(usize),
    #[error("{0} domains exceed the {max} domain limit", max = MAX_DOMS)]
    TooManyDomains(usize),
    #[error("{0} numa nodes exceed the {max} node limit", max = MAX_NUMA_NODES)]
    TooManyNodes(usize),
    #[error("cpu {cpu} maps to domain {dom}, only {nr_doms} domains exist")]
    CpuDomainOutOfRange { cpu: u32, dom: u32, nr_doms: u32 },
    #[error("cpu-to-domain map has {got} entries for {nr_cpus} cpus")]
    CpuMapLength { got: usize, nr_cpus: u32 },
    #[error("domain {dom} maps to node {node}, only {nr_nodes} nodes exist")]
    DomainNodeOutOfRange { dom: u32, node: u32, nr_nodes: u32 },
    #[error("domain-to-node map has {got} entries for {nr_doms} domains")]
    DomainMapLength { got: usize, nr_doms: u32 },
    #[error("cpu {cpu} membership disagrees with domain {dom} cpumask")]
    DomainMaskMismatch { cpu: u32, dom: u32 },
    #[error("domain {0} has no cpus")]
    EmptyDomain(u32),
    #[error("cpumask for {what} names cpu {cpu} beyond nr_cpus {nr_cpus}")]
    CpuBeyondRange { what: String, cpu: u32, nr_cpus: u32 },
}

// RAW LAYOUT AS HANDED TO THE CORE
#[derive(Clone, Debug, Default)]
pub struct TopologyInput {
    pub nr_cpus: u32,
    // HOME DOMAIN PER CPU, OR OFFLINE_CPU_DOM
    pub cpu_dom: Vec<u32>,
    pub dom_cpumasks: Vec<Cpumask>,
    pub dom_node: Vec<u32>,
    pub node_cpumasks: Vec<Cpumask>,
    // SMT SIBLINGS PER CPU (INCLUDING ITSELF). EMPTY: EVERY CPU IS ITS OWN CORE.
    pub core_siblings: Vec<Cpumask>,
}

impl TopologyInput {
    // DERIVE THE CPU MAP AND NODE MASKS FROM PER-DOMAIN MASKS
    pub fn from_domains(nr_cpus: u32, dom_cpumasks: Vec<Cpumask>, dom_node: Vec<u32>) -> Self {
        let mut cpu_dom = vec![OFFLINE_CPU_DOM; nr_cpus as usize];
        for (dom, mask) in dom_cpumasks.iter().enumerate() {
            for cpu in mask.iter() {
                if let Some(slot) = cpu_dom.get_mut(cpu as usize) {
                    *slot = dom as u32;
                }
            }
        }

        let nr_nodes = dom_node.iter().map(|&n| n as usize + 1).max().unwrap_or(1);
        let mut node_cpumasks = vec![Cpumask::new(); nr_nodes];
        for (dom, &node) in dom_node.iter().enumerate() {
            if let (Some(nmask), Some(dmask)) =
                (node_cpumasks.get_mut(node as usize), dom_cpumasks.get(dom))
            {
                *nmask = nmask.or(dmask);
            }
        }

        Self {
            nr_cpus,
            cpu_dom,
            dom_cpumasks,
            dom_node,
            node_cpumasks,
            core_siblings: Vec::new(),
        }
    }

    // nr_doms EQUAL DOMAINS OF CONSECUTIVE CPUS, doms_per_node DOMAINS PER NODE
    pub fn uniform(nr_cpus: u32, nr_doms: u32, doms_per_node: u32) -> Self {
        let nr_doms = nr_doms.max(1);
        let per_dom = (nr_cpus / nr_doms).max(1);
        let doms_per_node = doms_per_node.max(1);

        let dom_cpumasks = (0..nr_doms)
            .map(|d| {
                let lo = d * per_dom;
                let hi = if d == nr_doms - 1 { nr_cpus } else { lo + per_dom };
                Cpumask::from_cpus(lo..hi)
            })
            .collect();
        let dom_node = (0..nr_doms).map(|d| d / doms_per_node).collect();
        Self::from_domains(nr_cpus, dom_cpumasks, dom_node)
    }

    // PAIR CPUS (2k, 2k+1) AS SMT SIBLINGS
    pub fn with_smt_pairs(mut self) -> Self {
        self.core_siblings = (0..self.nr_cpus)
            .map(|cpu| {
                let base = cpu & !1;
                Cpumask::from_cpus((base..base + 2).filter(|&c| c < self.nr_cpus))
            })
            .collect();
        self
    }
}

#[derive(Debug)]
pub struct Topology {
    pub nr_cpus: u32,
    pub nr_doms: u32,
    pub nr_nodes: u32,
    cpu_dom: Vec<u32>,
    dom_cpumasks: Vec<Cpumask>,
    dom_node: Vec<u32>,
    node_cpumasks: Vec<Cpumask>,
    core_siblings: Vec<Cpumask>,
    // UNION OF ALL DOMAIN MASKS (EVERY ONLINE CPU)
    all_cpumask: Cpumask,
}

impl Topology {
    pub fn build(input: TopologyInput) -> Result<Self, TopologyError> {
        let TopologyInput {
            nr_cpus,
            cpu_dom,
            dom_cpumasks,
            dom_node,
            node_cpumasks,
            core_siblings,
        } = input;

        if nr_cpus as usize > MAX_CPUS {
            return Err(TopologyError::TooManyCpus(nr_cpus as usize));
        }
        if dom_cpumasks.is_empty() {
            return Err(TopologyError::NoDomains);
        }
        if dom_cpumasks.len() > MAX_DOMS {
            return Err(TopologyError::TooManyDomains(dom_cpumasks.len()));
        }
        if node_cpumasks.len() > MAX_NUMA_NODES {
            return Err(TopologyError::TooManyNodes(node_cpumasks.len()));
        }
        let nr_doms = dom_cpumasks.len() as u32;
        let nr_nodes = node_cpumasks.len().max(1) as u32;

        if cpu_dom.len() != nr_cpus as usize {
            return Err(TopologyError::CpuMapLength { got: cpu_dom.len(), nr_cpus });
        }
        if dom_node.len() != nr_doms as usize {
            return Err(TopologyError::DomainMapLength { got: dom_node.len(), nr_doms });
        }

        let beyond = |what: String, mask: &Cpumask| -> Result<(), TopologyError> {
            match mask.iter().find(|&cpu| cpu >= nr_cpus) {
                Some(cpu) => Err(TopologyError::CpuBeyondRange { what, cpu, nr_cpus }),
                None => Ok(()),
            }
        };
        for (dom, mask) in dom_cpumasks.iter().enumerate() {
            beyond(format!("domain {dom}"), mask)?;
            if mask.is_empty() {
                return Err(TopologyError::EmptyDomain(dom as u32));
            }
        }
        for (node, mask) in node_cpumasks.iter().enumerate() {
            beyond(format!("node {node}"), mask)?;
        }

        for (cpu, &dom) in cpu_dom.iter().enumerate() {
            let cpu = cpu as u32;
            if dom == OFFLINE_CPU_DOM {
                if let Some(owner) = dom_cpumasks.iter().position(|m| m.test(cpu)) {
                    return Err(TopologyError::DomainMaskMismatch { cpu, dom: owner as u32 });
                }
                continue;
            }
            if dom >= nr_doms {
                return Err(TopologyError::CpuDomainOutOfRange { cpu, dom, nr_doms });
            }
            // EXACTLY ONE DOMAIN MASK MAY CLAIM THE CPU, AND IT MUST BE dom
            for (d, mask) in dom_cpumasks.iter().enumerate() {
                if mask.test(cpu) != (d as u32 == dom) {
                    return Err(TopologyError::DomainMaskMismatch { cpu, dom: d as u32 });
                }
            }
        }

        for (dom, &node) in dom_node.iter().enumerate() {
            if node >= nr_nodes {
                return Err(TopologyError::DomainNodeOutOfRange { dom: dom as u32, node, nr_nodes });
            }
        }

        let core_siblings = if core_siblings.len() == nr_cpus as usize {
            core_siblings
                .into_iter()
                .enumerate()
                .map(|(cpu, mut mask)| {
                    mask.set(cpu as u32);
                    mask
                })
                .collect()
        } else {
            (0..nr_cpus).map(|cpu| Cpumask::from_cpus([cpu])).collect()
        };

        let all_cpumask = dom_cpumasks.iter().fold(Cpumask::new(), |acc, m| acc.or(m));
        let node_cpumasks = if node_cpumasks.is_empty() {
            vec![all_cpumask]
        } else {
            node_cpumasks
        };

        Ok(Self {
            nr_cpus,
            nr_doms,
            nr_nodes,
            cpu_dom,
            dom_cpumasks,
            dom_node,
            node_cpumasks,
            core_siblings,
            all_cpumask,
        })
    }

    // HOME DOMAIN, OR OFFLINE_CPU_DOM FOR CPUS OUTSIDE EVERY DOMAIN
    pub fn cpu_to_dom(&self, cpu: u32) -> u32 {
        if self.nr_doms <= 1 && self.all_cpumask.test(cpu) {
            return 0;
        }
        self.cpu_dom.get(cpu as usize).copied().unwrap_or(OFFLINE_CPU_DOM)
    }

    pub fn is_offline_cpu(&self, cpu: u32) -> bool {
        self.cpu_to_dom(cpu) >= self.nr_doms
    }

    pub fn dom_cpumask(&self, dom: u32) -> Option<&Cpumask> {
        self.dom_cpumasks.get(dom as usize)
    }

    pub fn dom_node(&self, dom: u32) -> Option<u32> {
        self.dom_node.get(dom as usize).copied()
    }

    pub fn node_cpumask(&self, node: u32) -> Option<&Cpumask> {
        self.node_cpumasks.get(node as usize)
    }

    pub fn core_siblings(&self, cpu: u32) -> Option<&Cpumask> {
        self.core_siblings.get(cpu as usize)
    }

    pub fn all_cpumask(&self) -> &Cpumask {
        &self.all_cpumask
    }

    // OTHER DOMAINS ON cpu'S NODE. THE ORDER DRIVES WORK-STEALING ORDER.
    pub fn node_sibling_doms(&self, cpu: u32) -> Vec<u32> {
        let home = self.cpu_to_dom(cpu);
        let Some(node) = self.dom_node(home) else {
            return Vec::new();
        };
        (0..self.nr_doms)
            .filter(|&d| d != home && self.dom_node(d) == Some(node))
            .collect()
    }

    // DOMAINS WHOSE CPUS INTERSECT mask, AS A BITMASK
    pub fn reachable_doms(&self, mask: &Cpumask) -> u64 {
        self.dom_cpumasks
            .iter()
            .enumerate()
            .filter(|(_, d)| d.intersects(mask))
            .fold(0u64, |acc, (i, _)| acc | (1u64 << i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_two_domains() {
        let topo = Topology::build(TopologyInput::uniform(8, 2, 2)).unwrap();
        assert_eq!(topo.nr_doms, 2);
        assert_eq!(topo.nr_nodes, 1);
        assert_eq!(topo.cpu_to_dom(3), 0);
        assert_eq!(topo.cpu_to_dom(4), 1);
        assert_eq!(topo.dom_cpumask(1).unwrap().to_string(), "4-7");
        assert_eq!(topo.node_sibling_doms(0), vec![1]);
        assert_eq!(topo.node_sibling_doms(5), vec![0]);
    }

    #[test]
    fn uniform_split_nodes_have_no_siblings() {
        let topo = Topology::build(TopologyInput::uniform(8, 2, 1)).unwrap();
        assert_eq!(topo.nr_nodes, 2);
        assert!(topo.node_sibling_doms(0).is_empty());
        assert_eq!(topo.node_cpumask(1).unwrap().to_string(), "4-7");
    }

    #[test]
    fn rejects_out_of_range_domain() {
        let mut input = TopologyInput::uniform(8, 2, 2);
        input.cpu_dom[7] = 5;
        assert_eq!(
            Topology::build(input).unwrap_err(),
            TopologyError::CpuDomainOutOfRange { cpu: 7, dom: 5, nr_doms: 2 }
        );
    }

    #[test]
    fn rejects_mask_disagreement() {
        let mut input = TopologyInput::uniform(8, 2, 2);
        input.cpu_dom[3] = 1;
        assert!(matches!(
            Topology::build(input),
            Err(TopologyError::DomainMaskMismatch { cpu: 3, .. })
        ));
    }

    #[test]
    fn rejects_too_many_domains() {
        let masks: Vec<Cpumask> = (0..65).map(|c| Cpumask::from_cpus([c])).collect();
        let nodes = vec![0; 65];
        let input = TopologyInput::from_domains(65, masks, nodes);
        assert_eq!(Topology::build(input).unwrap_err(), TopologyError::TooManyDomains(65));
    }

    #[test]
    fn rejects_too_many_cpus() {
        let input = TopologyInput {
            nr_cpus: 513,
            ..TopologyInput::default()
        };
        assert_eq!(Topology::build(input).unwrap_err(), TopologyError::TooManyCpus(513));
    }

    #[test]
    fn offline_cpu_has_no_domain() {
        let input = TopologyInput::from_domains(
            6,
            vec![Cpumask::from_cpus(0..2), Cpumask::from_cpus(2..4)],
            vec![0, 0],
        );
        let topo = Topology::build(input).unwrap();
        assert!(topo.is_offline_cpu(5));
        assert!(!topo.is_offline_cpu(1));
        assert_eq!(topo.all_cpumask().weight(), 4);
    }

    #[test]
    fn smt_pairs_include_self() {
        let topo = Topology::build(TopologyInput::uniform(4, 1, 1).with_smt_pairs()).unwrap();
        assert_eq!(topo.core_siblings(2).unwrap().to_string(), "2-3");
        assert_eq!(topo.core_siblings(1).unwrap().to_string(), "0-1");
    }

    #[test]
    fn reachable_doms_bitmask() {
        let topo = Topology::build(TopologyInput::uniform(8, 4, 4)).unwrap();
        assert_eq!(topo.reachable_doms(&Cpumask::from_cpus([0, 5])), 0b0101);
        assert_eq!(topo.reachable_doms(&Cpumask::new()), 0);
    }
}
