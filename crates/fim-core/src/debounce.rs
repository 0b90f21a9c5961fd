//! Per-path debouncing of raw filesystem notifications.
//!
//! Each ingest resets the path's timestamp. A path is handed out by `drain`
//! only once it has been quiet for the whole window, so a burst of writes
//! from one save becomes a single re-hash.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawEventKind {
    Created,
    Modified,
    Deleted,
    Moved { from: PathBuf },
}

/// A path-level notification as delivered by the OS facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: RawEventKind,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, kind: RawEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

#[derive(Debug)]
pub struct DebouncedEventAggregator {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl DebouncedEventAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn ingest(&mut self, event: RawEvent) {
        self.ingest_at(event, Instant::now());
    }

    /// O(1) per path, no I/O.
    pub fn ingest_at(&mut self, event: RawEvent, now: Instant) {
        if let RawEventKind::Moved { from } = event.kind {
            self.pending.insert(from, now);
        }
        self.pending.insert(event.path, now);
    }

    pub fn drain(&mut self) -> BTreeSet<PathBuf> {
        self.drain_at(Instant::now())
    }

    /// Remove and return every path that has been quiet for the window.
    pub fn drain_at(&mut self, now: Instant) -> BTreeSet<PathBuf> {
        let window = self.window;
        let ready: BTreeSet<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget everything in flight.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    fn modified(path: &str) -> RawEvent {
        RawEvent::new(path, RawEventKind::Modified)
    }

    #[test]
    fn burst_coalesces_into_one_flush() {
        let mut agg = DebouncedEventAggregator::new(WINDOW);
        let t0 = Instant::now();
        for i in 0..10 {
            agg.ingest_at(modified("/srv/a.txt"), t0 + Duration::from_millis(i * 20));
        }
        let last = t0 + Duration::from_millis(180);

        assert!(agg.drain_at(last + Duration::from_millis(50)).is_empty());
        let ready = agg.drain_at(last + WINDOW);
        assert_eq!(ready.len(), 1);
        assert!(ready.contains(&PathBuf::from("/srv/a.txt")));
        assert!(agg.is_idle());
        assert!(agg.drain_at(last + WINDOW * 5).is_empty());
    }

    #[test]
    fn spaced_events_flush_separately() {
        let mut agg = DebouncedEventAggregator::new(WINDOW);
        let t0 = Instant::now();
        let mut flushes = 0;
        for i in 0..4u32 {
            let at = t0 + (WINDOW * 3) * i;
            agg.ingest_at(modified("/srv/a.txt"), at);
            flushes += agg.drain_at(at + WINDOW + Duration::from_millis(1)).len();
        }
        assert_eq!(flushes, 4);
    }

    #[test]
    fn unsettled_paths_stay_pending() {
        let mut agg = DebouncedEventAggregator::new(WINDOW);
        let t0 = Instant::now();
        agg.ingest_at(modified("/srv/old"), t0);
        agg.ingest_at(modified("/srv/fresh"), t0 + Duration::from_millis(90));

        let ready = agg.drain_at(t0 + WINDOW);
        assert_eq!(ready.into_iter().collect::<Vec<_>>(), vec![PathBuf::from("/srv/old")]);
        assert_eq!(agg.pending_len(), 1);

        let ready = agg.drain_at(t0 + Duration::from_millis(190));
        assert_eq!(ready.into_iter().collect::<Vec<_>>(), vec![PathBuf::from("/srv/fresh")]);
    }

    #[test]
    fn move_marks_both_ends() {
        let mut agg = DebouncedEventAggregator::new(WINDOW);
        let t0 = Instant::now();
        agg.ingest_at(
            RawEvent::new(
                "/srv/new-name",
                RawEventKind::Moved {
                    from: PathBuf::from("/srv/old-name"),
                },
            ),
            t0,
        );
        let ready = agg.drain_at(t0 + WINDOW);
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn zero_window_flushes_on_next_drain() {
        let mut agg = DebouncedEventAggregator::new(Duration::ZERO);
        let t0 = Instant::now();
        agg.ingest_at(modified("/srv/a"), t0);
        assert_eq!(agg.drain_at(t0).len(), 1);
    }
}
