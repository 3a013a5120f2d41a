// MULTIDOM DISPATCH QUEUES
// ONE PER DOMAIN (SHARED BY ITS CPUS) AND ONE LOCAL QUEUE PER CPU.
// A QUEUE HOLDS FIFO ENTRIES AND VTIME-ORDERED ENTRIES; POP DRAINS THE
// VTIME SIDE FIRST. THE LENGTH IS MIRRORED IN AN ATOMIC SO THE CROSS-NUMA
// SCAN CAN READ DEPTHS WITHOUT TAKING EVERY LOCK.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::consts::Pid;

// VTIME KEYS ARE OFFSETS FROM A BASE SET THIS FAR BEHIND THE FIRST ENTRY
// OF EACH BUSY PERIOD. ORDER MATCHES vtime_before() ACROSS THE u64 WRAP AS
// LONG AS QUEUED VTIMES STAY WITHIN THE WINDOW OF EACH OTHER.
const VTIME_WINDOW: u64 = 1 << 62;

#[derive(Default)]
struct Queued {
    fifo: VecDeque<Pid>,
    // (vtime - base, insertion seq) KEEPS EQUAL VTIMES IN ARRIVAL ORDER
    vtime: BTreeMap<(u64, u64), Pid>,
    base: u64,
    seq: u64,
}

#[derive(Default)]
pub struct DispatchQueue {
    inner: Mutex<Queued>,
    nr: AtomicU32,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pid: Pid) {
        let mut q = self.inner.lock();
        q.fifo.push_back(pid);
        self.nr.fetch_add(1, Ordering::Relaxed);
    }

    pub fn insert_vtime(&self, pid: Pid, vtime: u64) {
        let mut q = self.inner.lock();
        if q.vtime.is_empty() {
            q.base = vtime.wrapping_sub(VTIME_WINDOW);
        }
        let seq = q.seq;
        q.seq += 1;
        let key = vtime.wrapping_sub(q.base);
        q.vtime.insert((key, seq), pid);
        self.nr.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pop(&self) -> Option<Pid> {
        let mut q = self.inner.lock();
        let pid = match q.vtime.pop_first() {
            Some((_, pid)) => Some(pid),
            None => q.fifo.pop_front(),
        };
        if pid.is_some() {
            self.nr.fetch_sub(1, Ordering::Relaxed);
        }
        pid
    }

    // FIRST ENTRY, IN pop() ORDER, THAT f ACCEPTS. REJECTED ENTRIES STAY PUT.
    pub fn pop_where(&self, mut f: impl FnMut(Pid) -> bool) -> Option<Pid> {
        let mut q = self.inner.lock();
        let key = q.vtime.iter().find(|(_, &p)| f(p)).map(|(k, _)| *k);
        let pid = match key {
            Some(key) => q.vtime.remove(&key),
            None => {
                let pos = q.fifo.iter().position(|&p| f(p));
                pos.and_then(|pos| q.fifo.remove(pos))
            }
        };
        if pid.is_some() {
            self.nr.fetch_sub(1, Ordering::Relaxed);
        }
        pid
    }

    pub fn nr_queued(&self) -> u32 {
        self.nr.load(Ordering::Relaxed)
    }

    // DROP A TASK THAT LEFT WHILE QUEUED. TRUE IF IT WAS FOUND.
    pub fn remove(&self, pid: Pid) -> bool {
        let mut q = self.inner.lock();
        if let Some(pos) = q.fifo.iter().position(|&p| p == pid) {
            q.fifo.remove(pos);
            self.nr.fetch_sub(1, Ordering::Relaxed);
            return true;
        }
        let key = q.vtime.iter().find(|(_, &p)| p == pid).map(|(k, _)| *k);
        if let Some(key) = key {
            q.vtime.remove(&key);
            self.nr.fetch_sub(1, Ordering::Relaxed);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vtime_before;

    #[test]
    fn fifo_order() {
        let q = DispatchQueue::new();
        q.insert(1);
        q.insert(2);
        q.insert(3);
        assert_eq!(q.nr_queued(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
        assert_eq!(q.nr_queued(), 0);
    }

    #[test]
    fn vtime_order_with_ties() {
        let q = DispatchQueue::new();
        q.insert_vtime(10, 500);
        q.insert_vtime(11, 100);
        q.insert_vtime(12, 500);
        assert_eq!(q.pop(), Some(11));
        assert_eq!(q.pop(), Some(10));
        assert_eq!(q.pop(), Some(12));
    }

    #[test]
    fn vtime_order_survives_wrap() {
        let q = DispatchQueue::new();
        q.insert_vtime(1, u64::MAX - 5);
        q.insert_vtime(2, 10);
        q.insert_vtime(3, u64::MAX - 100);
        assert!(vtime_before(u64::MAX - 5, 10));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));

        // EMPTY AGAIN: THE NEXT BUSY PERIOD STARTS ITS OWN WINDOW
        q.insert_vtime(4, 5);
        q.insert_vtime(5, 1);
        assert_eq!(q.pop(), Some(5));
        assert_eq!(q.pop(), Some(4));
    }

    #[test]
    fn vtime_entries_drain_before_fifo() {
        let q = DispatchQueue::new();
        q.insert(1);
        q.insert_vtime(2, 1_000_000);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(1));
    }

    #[test]
    fn pop_where_skips_rejected() {
        let q = DispatchQueue::new();
        q.insert_vtime(1, 10);
        q.insert_vtime(2, 20);
        q.insert(3);
        assert_eq!(q.pop_where(|p| p != 1), Some(2));
        assert_eq!(q.pop_where(|p| p == 3), Some(3));
        assert_eq!(q.pop_where(|_| false), None);
        assert_eq!(q.nr_queued(), 1);
        assert_eq!(q.pop(), Some(1));
    }

    #[test]
    fn remove_updates_depth() {
        let q = DispatchQueue::new();
        q.insert(1);
        q.insert_vtime(2, 5);
        assert!(q.remove(2));
        assert!(!q.remove(2));
        assert_eq!(q.nr_queued(), 1);
        assert_eq!(q.pop(), Some(1));
    }
}
