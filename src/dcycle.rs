// MULTIDOM DUTY-CYCLE TRACKING
// EACH DOMAIN COUNTS ITS RUNNABLE TASKS PER WEIGHT BUCKET AND KEEPS A
// DECAYING AVERAGE OF THAT COUNT. THE BALANCER TURNS THESE INTO LOAD.
//
// BUCKET LOCKS ARE TAKEN ONE AT A TIME. A TRANSFER DROPS THE SOURCE LOCK
// BEFORE TAKING THE DESTINATION LOCK, SO A READER MAY BRIEFLY SEE THE TASK
// IN NEITHER DOMAIN. IT IS NEVER COUNTED TWICE.

use std::sync::atomic::Ordering;

use log::debug;

use crate::consts::{LB_LOAD_BUCKETS, LB_MAX_WEIGHT, LB_MIN_WEIGHT, NSEC_PER_SEC};
use crate::domain::LoadBucket;
use crate::error::SchedError;
use crate::host::Host;
use crate::ravg::RAVG_FRAC_BITS;
use crate::scheduler::Scheduler;
use crate::task::TaskCtx;

pub fn weight_to_bucket_idx(weight: u32) -> usize {
    let weight = weight.clamp(LB_MIN_WEIGHT, LB_MAX_WEIGHT) as usize;
    (weight * LB_LOAD_BUCKETS / LB_MAX_WEIGHT as usize).min(LB_LOAD_BUCKETS - 1)
}

// dcycle += adj, CLAMPED AT ZERO. TRUE IF THE CLAMP FIRED.
fn bucket_adj(b: &mut LoadBucket, adj: i64) -> bool {
    b.dcycle += adj;
    if b.dcycle < 0 {
        b.dcycle = 0;
        return true;
    }
    false
}

impl<H: Host> Scheduler<H> {
    pub fn dom_dcycle_adj(&self, dom_id: u32, weight: u32, now: u64, runnable: bool) {
        let Some(domc) = self.domain(dom_id) else {
            self.report(0, SchedError::InvalidDomain(dom_id));
            return;
        };
        let half_life = self.cfg.load_half_life_ns;
        let idx = weight_to_bucket_idx(weight);
        let adj: i64 = if runnable { 1 } else { -1 };

        let (underflow, dcycle, avg) = {
            let mut b = domc.bucket(idx).lock();
            let underflow = bucket_adj(&mut b, adj);
            let dcycle = b.dcycle;
            b.rd.accumulate(dcycle as u64, now, half_life);
            let avg = if self.cfg.debug >= 2 { b.rd.read(now, half_life) } else { 0 };
            (underflow, dcycle, avg)
        };

        if underflow {
            let cpu = domc.cpumask.first().unwrap_or(0);
            self.report(cpu, SchedError::DcycleUnderflow { dom: dom_id, bucket: idx });
        }

        if self.cfg.debug >= 2 {
            let last = domc.dbg_dcycle_printed_at.load(Ordering::Relaxed);
            if last == 0 || now.saturating_sub(last) >= NSEC_PER_SEC {
                debug!(
                    "DCYCLE ADJ dom={dom_id} bucket={idx} adj={adj} dcycle={dcycle} avg_dcycle={}",
                    avg >> RAVG_FRAC_BITS
                );
                domc.dbg_dcycle_printed_at.store(now, Ordering::Relaxed);
            }
        }
    }

    // MOVE t'S DUTY CYCLE FROM from TO to. CALLER HOLDS THE TASK LOCK.
    pub(crate) fn dom_load_xfer_task(&self, t: &mut TaskCtx, from: u32, to: u32, now: u64) {
        let (Some(from_domc), Some(to_domc)) = (self.domain(from), self.domain(to)) else {
            self.report(t.cpu, SchedError::InvalidDomain(if self.domain(from).is_none() { from } else { to }));
            return;
        };
        let half_life = self.cfg.load_half_life_ns;
        let idx = weight_to_bucket_idx(t.weight);
        let adj = t.runnable as i64;

        t.dcyc_rd.accumulate(t.runnable as u64, now, half_life);
        let task_rd = t.dcyc_rd;

        let (underflow, from_avg) = {
            let mut b = from_domc.bucket(idx).lock();
            let underflow = bucket_adj(&mut b, -adj);
            let dcycle = b.dcycle as u64;
            b.rd.transfer(dcycle, &task_rd, false, half_life);
            (underflow, b.rd.read(now, half_life))
        };

        let to_avg = {
            let mut b = to_domc.bucket(idx).lock();
            bucket_adj(&mut b, adj);
            let dcycle = b.dcycle as u64;
            b.rd.transfer(dcycle, &task_rd, true, half_life);
            b.rd.read(now, half_life)
        };

        if underflow {
            self.report(t.cpu, SchedError::DcycleUnderflow { dom: from, bucket: idx });
        }

        if self.cfg.debug >= 2 {
            debug!(
                "XFER [{}] dom{from}->{to} task={} from={} to={}",
                t.pid,
                task_rd.read(now, half_life) >> RAVG_FRAC_BITS,
                from_avg >> RAVG_FRAC_BITS,
                to_avg >> RAVG_FRAC_BITS
            );
        }
    }

    // WEIGHT CHANGE: A RUNNABLE TASK'S +1 FOLLOWS IT TO THE NEW BUCKET
    pub(crate) fn dcycle_reweight(&self, t: &TaskCtx, old_weight: u32, now: u64) {
        if !t.runnable || self.domain(t.dom_id).is_none() {
            return;
        }
        if weight_to_bucket_idx(old_weight) == weight_to_bucket_idx(t.weight) {
            return;
        }
        self.dom_dcycle_adj(t.dom_id, old_weight, now, false);
        self.dom_dcycle_adj(t.dom_id, t.weight, now, true);
    }
}
