use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Status of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildProcessState {
    /// Process is running
    Alive,
    /// Process has exited, its pipes may still be open
    Exited,
    /// Process handle has been released
    Destroyed,
}

impl fmt::Display for ChildProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Alive => "alive",
            Self::Exited => "exited",
            Self::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// Transitions reported by the OS process, delivered in order over one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The process terminated. Pipes may still be open.
    Exit { code: Option<i32> },
    /// The process terminated and every stdio pipe reached EOF.
    Close,
    /// A termination request failed.
    Error(String),
}

/// Point-in-time view of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildProcessRecord {
    pub pid: u32,
    pub mutex: String,
    pub net_endpoint: String,
    pub ts_start: u64,
    pub ts_kill: Option<u64>,
    pub ts_exit: Option<u64>,
    pub ts_close: Option<u64>,
    pub state: ChildProcessState,
    pub is_alive: bool,
    /// Milliseconds
    pub uptime: u64,
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Timestamps tracked over a process lifetime, in epoch milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Timestamps {
    pub start: u64,
    pub kill: Option<u64>,
    pub exit: Option<u64>,
    pub close: Option<u64>,
}

impl Timestamps {
    pub fn started_now() -> Self {
        Self {
            start: now_ms(),
            ..Self::default()
        }
    }

    /// Time between start and the earliest of kill/exit/close, or now.
    pub fn uptime_at(&self, now: u64) -> Duration {
        let end = [self.kill, self.exit, self.close]
            .into_iter()
            .map(|ts| ts.unwrap_or(now))
            .min()
            .unwrap_or(now);
        Duration::from_millis(end.saturating_sub(self.start))
    }
}

/// Bounded, append-only list of past process snapshots.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<ChildProcessRecord>,
    limit: usize,
}

impl History {
    /// Create a history keeping at most `limit` entries (minimum 1)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Append a snapshot, evicting the oldest one when full
    pub fn push(&mut self, record: ChildProcessRecord) {
        if self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<ChildProcessRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&ChildProcessRecord> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: u32) -> ChildProcessRecord {
        ChildProcessRecord {
            pid,
            mutex: format!("m{pid}"),
            net_endpoint: "0.0.0.0:30120".to_string(),
            ts_start: 0,
            ts_kill: None,
            ts_exit: None,
            ts_close: None,
            state: ChildProcessState::Destroyed,
            is_alive: false,
            uptime: 0,
        }
    }

    #[test]
    fn test_uptime_uses_earliest_end() {
        let ts = Timestamps {
            start: 1_000,
            kill: Some(9_000),
            exit: Some(4_000),
            close: None,
        };
        assert_eq!(ts.uptime_at(20_000), Duration::from_millis(3_000));

        let running = Timestamps {
            start: 1_000,
            ..Timestamps::default()
        };
        assert_eq!(running.uptime_at(1_500), Duration::from_millis(500));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = History::new(2);
        history.push(record(1));
        history.push(record(2));
        history.push(record(3));

        let pids: Vec<u32> = history.entries().iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![2, 3]);
        assert_eq!(history.last().map(|r| r.pid), Some(3));
    }
}
