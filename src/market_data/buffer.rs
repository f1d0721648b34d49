use crate::core::events::Bar;
use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Bounded, thread-safe ring buffer of OHLCV bars, unique by `open_time`.
///
/// Written by the kline stream callback, read by the strategy loop. Critical
/// sections are a single append/replace or a copy of the contents.
pub struct MarketBuffer {
    bars: RwLock<VecDeque<Bar>>,
    capacity: usize,
}

impl MarketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replace the last bar when `open_time` matches (still-forming update),
    /// otherwise append and evict the oldest bar beyond capacity. Bars older
    /// than the last stored one are dropped.
    pub fn push(&self, bar: Bar) {
        let mut bars = self.write();
        match bars.back_mut() {
            Some(last) if last.open_time == bar.open_time => {
                *last = bar;
                return;
            }
            Some(last) if last.open_time > bar.open_time => {
                log::debug!(
                    "Dropping out-of-order bar {} (last {})",
                    bar.open_time,
                    last.open_time
                );
                return;
            }
            _ => {}
        }
        bars.push_back(bar);
        while bars.len() > self.capacity {
            bars.pop_front();
        }
    }

    /// Clear the buffer and load `bars` in order (warm-up)
    pub fn reset(&self, bars: impl IntoIterator<Item = Bar>) {
        self.write().clear();
        for bar in bars {
            self.push(bar);
        }
    }

    /// Consistent copy of the current contents
    pub fn snapshot(&self) -> Vec<Bar> {
        self.read().iter().copied().collect()
    }

    pub fn last(&self) -> Option<Bar> {
        self.read().back().copied()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panicking writer cannot leave a bar half-written, so a poisoned lock
    // still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Bar>> {
        self.bars.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Bar>> {
        self.bars.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
