// MULTIDOM DOMAIN ASSIGNMENT
// PICKING A HOME DOMAIN FOR A TASK AND MOVING IT THERE.
//
// A MOVE CARRIES THE TASK'S VTIME LAG RELATIVE TO ITS OLD DOMAIN'S CLOCK
// OVER TO THE NEW DOMAIN'S CLOCK, AND ITS DUTY CYCLE FROM THE OLD DOMAIN'S
// BUCKET TO THE NEW ONE.

use crate::consts::NO_DOM_FOUND;
use crate::cpumask::Cpumask;
use crate::error::SchedError;
use crate::host::Host;
use crate::scheduler::Scheduler;
use crate::task::TaskCtx;

impl<H: Host> Scheduler<H> {
    // ROUND-ROBIN FROM THE CALLING CPU'S CURSOR SO NEW TASKS SPREAD OUT.
    // REBUILDS dom_mask AS A SIDE EFFECT.
    pub(crate) fn task_pick_domain(&self, t: &mut TaskCtx, cpu: u32, allowed: &Cpumask) -> u32 {
        t.dom_mask = 0;
        let Some(pcpu) = self.cpu_ctx(cpu) else {
            return NO_DOM_FOUND;
        };

        let nr_doms = self.topo.nr_doms;
        let mut first_dom = NO_DOM_FOUND;
        let mut dom = pcpu.rr_next();
        for _ in 0..nr_doms {
            dom = (dom + 1) % nr_doms;
            if self.doms[dom as usize].cpumask.intersects(allowed) {
                t.dom_mask |= 1u64 << dom;
                if first_dom == NO_DOM_FOUND {
                    first_dom = dom;
                }
            }
        }
        first_dom
    }

    // MOVE t TO new_dom. FALSE IF t CANNOT RUN THERE; NOTHING CHANGES THEN.
    // NO_DOM_FOUND PARKS THE TASK OFFLINE, WHICH ONLY WORKS WHILE UNQUEUED.
    pub fn assign_domain(&self, t: &mut TaskCtx, new_dom: u32, is_initial: bool) -> bool {
        if new_dom == NO_DOM_FOUND {
            t.offline = true;
            t.cpumask.clear_all();
            return !t.queued;
        }

        let Some(new_domc) = self.domain(new_dom) else {
            self.report(t.cpu, SchedError::InvalidDomain(new_dom));
            return false;
        };
        if !new_domc.cpumask.intersects(&t.allowed) {
            return false;
        }

        let vtime_delta = match (is_initial, self.domain(t.dom_id)) {
            (false, Some(old)) => t.vtime.wrapping_sub(old.vtime_now()),
            _ => 0,
        };

        let old_dom = t.dom_id;
        if old_dom != new_dom && self.domain(old_dom).is_some() {
            let now = self.now();
            self.dom_load_xfer_task(t, old_dom, new_dom, now);
        }

        t.vtime = new_domc.vtime_now().wrapping_add(vtime_delta);
        t.dom_id = new_dom;
        t.cpumask = new_domc.cpumask.and(&t.allowed);
        t.offline = false;
        t.preferred_dom_mask = self.node_dom_mask(new_domc.node) & t.dom_mask;
        true
    }

    pub(crate) fn task_pick_and_set_domain(
        &self,
        t: &mut TaskCtx,
        cpu: u32,
        allowed: &Cpumask,
        is_initial: bool,
    ) {
        let dom = if self.topo.nr_doms > 1 {
            self.task_pick_domain(t, cpu, allowed)
        } else {
            t.dom_mask = self.topo.reachable_doms(allowed);
            if t.dom_mask & 1 != 0 { 0 } else { NO_DOM_FOUND }
        };

        if !self.assign_domain(t, dom, is_initial) {
            self.report(cpu, SchedError::DomainAssignFailed { pid: t.pid, dom });
        }
    }

    // AFFINITY CHANGED. A TASK STAYS HOME WHILE HOME IS STILL REACHABLE;
    // ONLY AN UNREACHABLE (OR MISSING) HOME SENDS IT THROUGH THE PICK AGAIN.
    pub(crate) fn task_refresh_domain(&self, t: &mut TaskCtx, cpu: u32, allowed: &Cpumask) {
        let reachable = self.topo.reachable_doms(allowed);
        let still_home = !t.offline && 1u64.checked_shl(t.dom_id).is_some_and(|bit| reachable & bit != 0);
        let home = if still_home { self.domain(t.dom_id) } else { None };

        match home {
            Some(domc) => {
                t.dom_mask = reachable;
                t.cpumask = domc.cpumask.and(allowed);
                t.preferred_dom_mask = self.node_dom_mask(domc.node) & reachable;
            }
            None => self.task_pick_and_set_domain(t, cpu, allowed, false),
        }
    }

    // EVERY DOMAIN ON node, AS A BITMASK
    fn node_dom_mask(&self, node: u32) -> u64 {
        self.doms
            .iter()
            .filter(|d| d.node == node)
            .fold(0u64, |acc, d| acc | (1u64 << d.id))
    }
}
