use std::time::{Duration, Instant};

/// Request to show or hide the "working" indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Show,
    Hide,
}

/// Elapsed-time watchdog for data source evaluations.
///
/// Every evaluation re-arms the clock. Once the threshold passes the
/// indicator is shown, and it stays up across the following evaluations
/// until the scheduler runs out of work.
#[derive(Debug)]
pub(crate) struct Watchdog {
    threshold: Duration,
    armed: Option<Instant>,
    shown: bool,
}

impl Watchdog {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            armed: None,
            shown: false,
        }
    }

    pub(crate) fn arm(&mut self, now: Instant) {
        self.armed = Some(now + self.threshold);
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = None;
    }

    /// When the indicator has to be shown, if it is not up already.
    pub(crate) fn due(&self) -> Option<Instant> {
        if self.shown { None } else { self.armed }
    }

    pub(crate) fn poll(&mut self, now: Instant) -> Option<Progress> {
        match self.due() {
            Some(due) if now >= due => {
                self.shown = true;
                Some(Progress::Show)
            }
            _ => None,
        }
    }

    pub(crate) fn settle(&mut self) -> Option<Progress> {
        self.armed = None;
        if self.shown {
            self.shown = false;
            Some(Progress::Hide)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_millis(500);

    #[test]
    fn test_fast_evaluation_never_shows() {
        let mut watchdog = Watchdog::new(THRESHOLD);
        let t0 = Instant::now();

        watchdog.arm(t0);
        assert_eq!(watchdog.poll(t0 + Duration::from_millis(100)), None);
        watchdog.disarm();

        assert_eq!(watchdog.poll(t0 + Duration::from_secs(5)), None);
        assert_eq!(watchdog.settle(), None);
    }

    #[test]
    fn test_slow_evaluation_shows_once() {
        let mut watchdog = Watchdog::new(THRESHOLD);
        let t0 = Instant::now();

        watchdog.arm(t0);
        assert_eq!(watchdog.due(), Some(t0 + THRESHOLD));
        assert_eq!(watchdog.poll(t0 + THRESHOLD), Some(Progress::Show));
        assert_eq!(watchdog.poll(t0 + THRESHOLD * 3), None);
        assert_eq!(watchdog.due(), None);
    }

    #[test]
    fn test_stays_up_between_items() {
        let mut watchdog = Watchdog::new(THRESHOLD);
        let t0 = Instant::now();

        watchdog.arm(t0);
        assert_eq!(watchdog.poll(t0 + THRESHOLD), Some(Progress::Show));
        watchdog.disarm();

        // next item in the same request
        let t1 = t0 + THRESHOLD * 2;
        watchdog.arm(t1);
        assert_eq!(watchdog.poll(t1 + THRESHOLD), None);
        watchdog.disarm();

        assert_eq!(watchdog.settle(), Some(Progress::Hide));
        assert_eq!(watchdog.settle(), None);
    }
}
