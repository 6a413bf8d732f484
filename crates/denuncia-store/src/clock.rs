use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use denuncia_types::ServerTimestamp;

/// Internal mutable state of the server clock.
struct ClockState {
    /// Last-issued physical millisecond timestamp.
    millis: u64,
    /// Logical counter for writes within the same physical millisecond.
    logical: u32,
}

/// Hybrid logical clock that stamps server timestamps.
///
/// Combines wall-clock time with a logical counter so that every value it
/// issues is strictly greater than the previous one, even when several writes
/// land in the same millisecond or the wall clock steps backwards.
///
/// - `millis = max(wall_clock, state.millis)`
/// - if `millis` advanced, `logical = 0`; otherwise `logical += 1`
pub struct ServerClock {
    state: Mutex<ClockState>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                millis: 0,
                logical: 0,
            }),
        }
    }

    /// Issue the next timestamp.
    pub fn now(&self) -> ServerTimestamp {
        let wall = Self::wall_clock_ms();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let millis = wall.max(state.millis);
        let logical = if millis > state.millis {
            0
        } else {
            state.logical + 1
        };

        state.millis = millis;
        state.logical = logical;

        ServerTimestamp::new(millis, logical)
    }

    /// The most recently issued timestamp, or zero if none was issued.
    pub fn last(&self) -> ServerTimestamp {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        ServerTimestamp::new(state.millis, state.logical)
    }

    fn wall_clock_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServerClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerClock").field("last", &self.last()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_across_rapid_calls() {
        let clock = ServerClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev, "clock must be strictly monotonic: {prev:?} >= {next:?}");
            prev = next;
        }
    }

    #[test]
    fn logical_increments_when_wall_clock_lags() {
        let clock = ServerClock::new();
        {
            let mut state = clock.state.lock().unwrap();
            state.millis = u64::MAX; // Far future; wall clock can never exceed.
            state.logical = 0;
        }
        let t1 = clock.now();
        let t2 = clock.now();
        assert_eq!(t1.millis, u64::MAX);
        assert_eq!(t1.logical, 1);
        assert_eq!(t2.logical, 2);
    }

    #[test]
    fn last_tracks_latest_issue() {
        let clock = ServerClock::new();
        assert_eq!(clock.last(), ServerTimestamp::zero());
        let t = clock.now();
        assert_eq!(clock.last(), t);
    }

    #[test]
    fn concurrent_now_calls_are_unique() {
        use std::sync::Arc;
        use std::thread;

        let clock = Arc::new(ServerClock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || (0..100).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let len = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), len, "all timestamps must be unique across threads");
    }
}
