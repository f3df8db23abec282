use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::trace;

/// Cumulative byte counters of one interface at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSample {
    pub interface_name: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub timestamp: Instant,
}

impl CounterSample {
    pub fn new(interface_name: impl Into<String>, bytes_sent: u64, bytes_received: u64) -> Self {
        Self {
            interface_name: interface_name.into(),
            bytes_sent,
            bytes_received,
            timestamp: Instant::now(),
        }
    }
}

/// Upload/download rates derived from two consecutive samples, bytes per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub upload_bps: f64,
    pub download_bps: f64,
}

impl Rates {
    pub const ZERO: Self = Self {
        upload_bps: 0.0,
        download_bps: 0.0,
    };
}

/// Previous counter sample per interface name.
///
/// Entries are overwritten on every observation and never evicted; the map is
/// bounded by the number of interfaces the host ever exposed.
#[derive(Debug, Default)]
pub struct CounterCache {
    previous: HashMap<String, CounterSample>,
    /// Interfaces that vanished since their last sample.
    stale: HashSet<String>,
}

impl CounterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `current` and returns the rates against the previous sample.
    ///
    /// Returns `None` when there is no usable previous sample: the interface
    /// was never seen, it went missing since its last sample, or a counter
    /// went backwards (link reset).
    pub fn observe(&mut self, current: CounterSample, interval_secs: f64) -> Option<Rates> {
        let rates = if self.stale.remove(&current.interface_name) {
            None
        } else {
            self.previous
                .get(&current.interface_name)
                .and_then(|prev| rates_between(prev, &current, interval_secs))
        };
        self.previous.insert(current.interface_name.clone(), current);
        rates
    }

    /// Marks every cached interface absent from `present` as stale, so its
    /// next observation behaves like a first read.
    pub fn mark_missing<'a>(&mut self, present: impl IntoIterator<Item = &'a str>) {
        let present: HashSet<&str> = present.into_iter().collect();
        for name in self.previous.keys() {
            if !present.contains(name.as_str()) {
                self.stale.insert(name.clone());
            }
        }
    }

    #[cfg(test)]
    pub fn previous(&self, interface_name: &str) -> Option<&CounterSample> {
        self.previous.get(interface_name)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.previous.len()
    }
}

fn rates_between(prev: &CounterSample, current: &CounterSample, interval_secs: f64) -> Option<Rates> {
    if current.bytes_sent < prev.bytes_sent || current.bytes_received < prev.bytes_received {
        return None;
    }
    if !(interval_secs.is_finite() && interval_secs > 0.0) {
        return None;
    }
    trace!(
        interface = %current.interface_name,
        elapsed = ?current.timestamp.duration_since(prev.timestamp),
        interval_secs = interval_secs,
        "counter delta"
    );
    Some(Rates {
        upload_bps: (current.bytes_sent - prev.bytes_sent) as f64 / interval_secs,
        download_bps: (current.bytes_received - prev.bytes_received) as f64 / interval_secs,
    })
}
