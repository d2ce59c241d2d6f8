use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use serde::Serialize;
use crate::event::SketchEvent;

/// Timing collected for one profiled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProfileStats {
    pub calls: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl ProfileStats {
    pub fn record(&mut self, elapsed: Duration) {
        if self.calls == 0 {
            self.min = elapsed;
            self.max = elapsed;
        } else {
            self.min = self.min.min(elapsed);
            self.max = self.max.max(elapsed);
        }
        self.calls += 1;
        self.total += elapsed;
    }

    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total.as_nanos() / self.calls as u128) as u64)
    }
}

impl std::fmt::Display for ProfileStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} calls, total {:?}, mean {:?}, min {:?}, max {:?}",
            self.calls,
            self.total,
            self.mean(),
            self.min,
            self.max
        )
    }
}

#[derive(Default)]
pub(crate) struct Profiler {
    stats: Mutex<HashMap<SketchEvent, ProfileStats>>,
}

impl Profiler {
    pub(crate) fn record(&self, event: SketchEvent, elapsed: Duration) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.entry(event).or_default().record(elapsed);
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<SketchEvent, ProfileStats> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.iter().map(|(event, s)| (*event, *s)).collect()
    }
}

/// Writes one `info` line per profiled callback.
pub fn log_stats(stats: &BTreeMap<SketchEvent, ProfileStats>) {
    if stats.is_empty() {
        log::info!("no profiled callbacks have run");
        return;
    }
    for (event, s) in stats {
        log::info!("{}: {}", event, s);
    }
}
