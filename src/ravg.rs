// MULTIDOM RUNNING AVERAGE
// DECAYING AVERAGE OF A STEP FUNCTION (DUTY-CYCLE COUNTERS, RUNNABLE FLAGS).
//
// TIME IS CUT INTO HALF-LIFE PERIODS. AT EACH PERIOD BOUNDARY THE OLD AVERAGE
// HALVES AND THE FINISHED PERIOD'S MEAN FILLS THE OTHER HALF:
//     old' = old/2 + period/2
// N PERIODS AT A CONSTANT VALUE COLLAPSE INTO ONE SHIFT BY N, SO THE COST OF
// AN UPDATE DOES NOT DEPEND ON HOW LONG THE VALUE SAT UNTOUCHED.
// ALL AVERAGES ARE FIXED POINT WITH RAVG_FRAC_BITS FRACTIONAL BITS.

pub const RAVG_FRAC_BITS: u32 = 20;
pub const RAVG_1: u64 = 1 << RAVG_FRAC_BITS;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RavgData {
    // CURRENT STEP VALUE (INTEGER, NOT FIXED POINT)
    pub val: u64,
    // WHEN val WAS LAST SET
    pub val_at: u64,
    // AVERAGE OVER ALL COMPLETED PERIODS
    pub old: u64,
    // ACCUMULATION OF THE CURRENT, UNFINISHED PERIOD
    pub cur: u64,
}

// val HELD FOR dur NS, EXPRESSED AS A FRACTION OF ONE PERIOD (FIXED POINT)
fn weighted(val: u64, dur: u64, half_life: u64) -> u64 {
    let v = ((val as u128) << RAVG_FRAC_BITS) * dur as u128 / half_life as u128;
    v.min(u64::MAX as u128) as u64
}

// n PERIODS OF old' = old/2 + target/2
fn decay_toward(old: u64, target: u64, periods: u64) -> u64 {
    if periods >= 64 {
        return target;
    }
    if old >= target {
        target + ((old - target) >> periods)
    } else {
        target - ((target - old) >> periods)
    }
}

impl RavgData {
    // FOLD THE TIME SINCE val_at INTO THE AVERAGE, THEN SWITCH TO new_val
    pub fn accumulate(&mut self, new_val: u64, now: u64, half_life: u64) {
        let half_life = half_life.max(1);
        // CLOCKS READ ON DIFFERENT CPUS CAN GO BACKWARDS A LITTLE
        let now = now.max(self.val_at);

        let val_seq = self.val_at / half_life;
        let cur_seq = now / half_life;

        if cur_seq == val_seq {
            self.cur = self
                .cur
                .saturating_add(weighted(self.val, now - self.val_at, half_life));
        } else {
            // CLOSE OUT THE PERIOD val_at WAS IN
            let period_end = (val_seq + 1) * half_life;
            let closing = self
                .cur
                .saturating_add(weighted(self.val, period_end - self.val_at, half_life));
            self.old = self.old / 2 + closing / 2;

            // WHOLE PERIODS SPENT AT val
            let full = cur_seq - val_seq - 1;
            if full > 0 {
                self.old = decay_toward(self.old, self.val << RAVG_FRAC_BITS, full);
            }

            self.cur = weighted(self.val, now % half_life, half_life);
        }

        self.val = new_val;
        self.val_at = now;
    }

    // AVERAGE AS OF now, INTERPOLATED WITHIN THE CURRENT PERIOD
    pub fn read(&self, now: u64, half_life: u64) -> u64 {
        let half_life = half_life.max(1);
        let mut t = *self;
        t.accumulate(t.val, now, half_life);

        let elapsed = t.val_at % half_life;
        if elapsed == 0 {
            return t.old;
        }
        // AT THE END OF THE PERIOD THIS REACHES old/2 + cur/2, MATCHING accumulate()
        let shed = ((t.old as u128 * elapsed as u128) / (2 * half_life as u128)) as u64;
        t.old - shed + t.cur / 2
    }

    // MOVE xfer'S CONTRIBUTION INTO (xfer_in) OR OUT OF self.
    // xfer MUST ALREADY BE ACCUMULATED TO THE TRANSFER TIME.
    pub fn transfer(&mut self, base_new_val: u64, xfer: &RavgData, xfer_in: bool, half_life: u64) {
        self.accumulate(self.val, xfer.val_at, half_life);
        if xfer_in {
            self.old = self.old.saturating_add(xfer.old);
            self.cur = self.cur.saturating_add(xfer.cur);
        } else {
            self.old = self.old.saturating_sub(xfer.old);
            self.cur = self.cur.saturating_sub(xfer.cur);
        }
        self.val = base_new_val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HL: u64 = 1_000_000_000;

    #[test]
    fn constant_one_converges_to_one() {
        let mut rd = RavgData::default();
        rd.accumulate(1, 0, HL);
        let avg = rd.read(20 * HL, HL);
        // WITHIN 2^-19 OF 1.0 AFTER 20 HALF-LIVES
        assert!(avg > RAVG_1 - (RAVG_1 >> 19) && avg <= RAVG_1, "avg={avg}");
    }

    #[test]
    fn one_half_life_gives_half() {
        let mut rd = RavgData::default();
        rd.accumulate(1, 0, HL);
        // END OF FIRST PERIOD: old = 0/2 + 1/2
        assert_eq!(rd.read(HL, HL), RAVG_1 / 2);
    }

    #[test]
    fn decays_after_value_drops() {
        let mut rd = RavgData::default();
        rd.accumulate(1, 0, HL);
        rd.accumulate(0, 30 * HL, HL);
        let high = rd.read(30 * HL, HL);
        let later = rd.read(31 * HL, HL);
        let much_later = rd.read(32 * HL, HL);
        assert!(later < high);
        assert!(much_later <= later / 2 + 1);
    }

    #[test]
    fn read_is_continuous_mid_period() {
        let mut rd = RavgData::default();
        rd.accumulate(2, 0, HL);
        let a = rd.read(HL + HL / 2 - 1, HL);
        let b = rd.read(HL + HL / 2, HL);
        assert!(a.abs_diff(b) < RAVG_1 / 1000);
    }

    #[test]
    fn read_does_not_mutate() {
        let mut rd = RavgData::default();
        rd.accumulate(3, 5, HL);
        let before = rd;
        let _ = rd.read(10 * HL, HL);
        assert_eq!(rd, before);
    }

    #[test]
    fn clock_going_backwards_is_clamped() {
        let mut rd = RavgData::default();
        rd.accumulate(1, 10 * HL, HL);
        rd.accumulate(0, 9 * HL, HL);
        assert_eq!(rd.val_at, 10 * HL);
        assert_eq!(rd.val, 0);
    }

    #[test]
    fn transfer_out_then_in_restores_average() {
        let mut base = RavgData::default();
        base.accumulate(2, 0, HL);
        let mut task = RavgData::default();
        task.accumulate(1, 0, HL);

        let now = 3 * HL + 7;
        task.accumulate(1, now, HL);
        let before = base.read(now, HL);

        base.transfer(1, &task, false, HL);
        let removed = base.read(now, HL);
        assert!(removed < before);

        base.transfer(2, &task, true, HL);
        let restored = base.read(now, HL);
        assert!(restored.abs_diff(before) <= 2, "before={before} restored={restored}");
    }
}
