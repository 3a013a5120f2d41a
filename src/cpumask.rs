// MULTIDOM CPU MASKS
// FIXED-WIDTH (MAX_CPUS BITS) MASKS. NO HEAP, NO VARIABLE LOOP COUNTS.
//
// Cpumask:       PLAIN VALUE. DOMAIN/NODE MEMBERSHIP, TASK AFFINITY.
// AtomicCpumask: SHARED, LOCK-FREE PER-BIT UPDATES. IDLE TRACKING AND THE
//                GREEDY SETS THE TUNER REWRITES UNDER LIVE READERS.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::consts::MAX_CPUS;

pub const MASK_WORDS: usize = MAX_CPUS / 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CpulistError {
    #[error("malformed cpu list entry '{0}'")]
    Malformed(String),
    #[error("cpu {0} exceeds the {max} cpu limit", max = MAX_CPUS)]
    OutOfRange(u32),
    #[error("inverted cpu range {0}-{1}")]
    Inverted(u32, u32),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cpumask {
    words: [u64; MASK_WORDS],
}

impl Cpumask {
    pub const fn new() -> Self {
        Self { words: [0; MASK_WORDS] }
    }

    pub fn from_words(words: [u64; MASK_WORDS]) -> Self {
        Self { words }
    }

    // CPUS [0, nr_cpus)
    pub fn full(nr_cpus: u32) -> Self {
        let mut mask = Self::new();
        for cpu in 0..nr_cpus.min(MAX_CPUS as u32) {
            mask.set(cpu);
        }
        mask
    }

    pub fn from_cpus<I: IntoIterator<Item = u32>>(cpus: I) -> Self {
        let mut mask = Self::new();
        for cpu in cpus {
            mask.set(cpu);
        }
        mask
    }

    // PARSE "0-3,8,10-11" (SYSFS cpulist FORMAT)
    pub fn parse_cpulist(list: &str) -> Result<Self, CpulistError> {
        static RANGE: OnceLock<Regex> = OnceLock::new();
        let re = RANGE.get_or_init(|| {
            Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$").expect("static cpulist regex")
        });

        let mut mask = Self::new();
        for chunk in list.trim().split(',').filter(|c| !c.trim().is_empty()) {
            let caps = re
                .captures(chunk)
                .ok_or_else(|| CpulistError::Malformed(chunk.to_string()))?;
            let lo: u32 = caps[1]
                .parse()
                .map_err(|_| CpulistError::Malformed(chunk.to_string()))?;
            let hi: u32 = match caps.get(2) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| CpulistError::Malformed(chunk.to_string()))?,
                None => lo,
            };
            if hi < lo {
                return Err(CpulistError::Inverted(lo, hi));
            }
            if hi as usize >= MAX_CPUS {
                return Err(CpulistError::OutOfRange(hi));
            }
            for cpu in lo..=hi {
                mask.set(cpu);
            }
        }
        Ok(mask)
    }

    pub fn words(&self) -> &[u64; MASK_WORDS] {
        &self.words
    }

    pub fn test(&self, cpu: u32) -> bool {
        let cpu = cpu as usize;
        cpu < MAX_CPUS && self.words[cpu / 64] & (1u64 << (cpu % 64)) != 0
    }

    pub fn set(&mut self, cpu: u32) {
        let cpu = cpu as usize;
        if cpu < MAX_CPUS {
            self.words[cpu / 64] |= 1u64 << (cpu % 64);
        }
    }

    pub fn clear(&mut self, cpu: u32) {
        let cpu = cpu as usize;
        if cpu < MAX_CPUS {
            self.words[cpu / 64] &= !(1u64 << (cpu % 64));
        }
    }

    pub fn clear_all(&mut self) {
        self.words = [0; MASK_WORDS];
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn weight(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn and(&self, other: &Cpumask) -> Cpumask {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= o;
        }
        out
    }

    pub fn or(&self, other: &Cpumask) -> Cpumask {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
        out
    }

    pub fn and_not(&self, other: &Cpumask) -> Cpumask {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= !o;
        }
        out
    }

    pub fn intersects(&self, other: &Cpumask) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    // TRUE IF EVERY CPU IN self IS ALSO IN other
    pub fn is_subset(&self, other: &Cpumask) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & !b == 0)
    }

    pub fn first(&self) -> Option<u32> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, &w)| w != 0)
            .map(|(i, w)| (i * 64) as u32 + w.trailing_zeros())
    }

    // FIRST SET CPU AT OR AFTER start, WRAPPING. SPREADS PICKS WITHOUT A RNG.
    pub fn next_wrapping(&self, start: u32) -> Option<u32> {
        let start = start as usize % MAX_CPUS;
        self.iter()
            .find(|&cpu| cpu as usize >= start)
            .or_else(|| self.first())
    }

    pub fn iter(&self) -> CpumaskIter<'_> {
        CpumaskIter { mask: self, word: 0, bits: self.words[0] }
    }
}

pub struct CpumaskIter<'a> {
    mask: &'a Cpumask,
    word: usize,
    bits: u64,
}

impl Iterator for CpumaskIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.bits != 0 {
                let bit = self.bits.trailing_zeros();
                self.bits &= self.bits - 1;
                return Some((self.word * 64) as u32 + bit);
            }
            self.word += 1;
            if self.word >= MASK_WORDS {
                return None;
            }
            self.bits = self.mask.words[self.word];
        }
    }
}

// CPULIST NOTATION: 0-3,8,10-11
impl fmt::Display for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut iter = self.iter().peekable();
        while let Some(lo) = iter.next() {
            let mut hi = lo;
            while iter.peek() == Some(&(hi + 1)) {
                hi = iter.next().unwrap_or(hi);
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cpumask({self})")
    }
}

pub struct AtomicCpumask {
    words: [AtomicU64; MASK_WORDS],
}

impl AtomicCpumask {
    pub fn new() -> Self {
        Self { words: std::array::from_fn(|_| AtomicU64::new(0)) }
    }

    pub fn from_mask(mask: &Cpumask) -> Self {
        let out = Self::new();
        out.store(mask);
        out
    }

    pub fn test_cpu(&self, cpu: u32) -> bool {
        let cpu = cpu as usize;
        cpu < MAX_CPUS && self.words[cpu / 64].load(Ordering::Relaxed) & (1u64 << (cpu % 64)) != 0
    }

    pub fn set_cpu(&self, cpu: u32) {
        let cpu = cpu as usize;
        if cpu < MAX_CPUS {
            self.words[cpu / 64].fetch_or(1u64 << (cpu % 64), Ordering::Relaxed);
        }
    }

    pub fn clear_cpu(&self, cpu: u32) {
        let cpu = cpu as usize;
        if cpu < MAX_CPUS {
            self.words[cpu / 64].fetch_and(!(1u64 << (cpu % 64)), Ordering::Relaxed);
        }
    }

    // ATOMICALLY CLEAR THE BIT. TRUE IF THIS CALLER WAS THE ONE TO CLEAR IT.
    pub fn test_and_clear_cpu(&self, cpu: u32) -> bool {
        let cpu = cpu as usize;
        if cpu >= MAX_CPUS {
            return false;
        }
        let bit = 1u64 << (cpu % 64);
        self.words[cpu / 64].fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    pub fn store(&self, mask: &Cpumask) {
        for (w, &v) in self.words.iter().zip(mask.words().iter()) {
            w.store(v, Ordering::Relaxed);
        }
    }

    // NOT A CONSISTENT CUT ACROSS WORDS. GOOD ENOUGH FOR HEURISTICS.
    pub fn snapshot(&self) -> Cpumask {
        Cpumask::from_words(std::array::from_fn(|i| self.words[i].load(Ordering::Relaxed)))
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }

    pub fn intersects(&self, mask: &Cpumask) -> bool {
        self.words
            .iter()
            .zip(mask.words().iter())
            .any(|(w, &m)| w.load(Ordering::Relaxed) & m != 0)
    }
}

impl Default for AtomicCpumask {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AtomicCpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicCpumask({})", self.snapshot())
    }
}
