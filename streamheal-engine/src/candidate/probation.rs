//! Candidate probation
//!
//! After a switch, further switching is suppressed for a window to damp
//! flapping between two candidates with similar, noisy scores. Expiry is
//! lazy: the first check past the deadline clears the window and logs once.

use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ProbationWindow {
    window: Duration,
    until: Option<Instant>,
    reason: Option<String>,
}

impl ProbationWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: None,
            reason: None,
        }
    }

    pub fn activate(&mut self, reason: &str, now: Instant) {
        let until = now + self.window;
        info!(reason, window_ms = self.window.as_millis() as u64, "Candidate probation started");
        self.until = Some(until);
        self.reason = Some(reason.to_string());
    }

    /// Active until `now > until`; clears itself on the first expired check
    pub fn is_active(&mut self, now: Instant) -> bool {
        match self.until {
            None => false,
            Some(until) if now > until => {
                info!(reason = self.reason.as_deref().unwrap_or(""), "Candidate probation expired");
                self.until = None;
                self.reason = None;
                false
            }
            Some(_) => true,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn until(&self) -> Option<Instant> {
        self.until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_by_default() {
        let mut probation = ProbationWindow::new(Duration::from_secs(5));
        assert!(!probation.is_active(Instant::now()));
        assert!(probation.reason().is_none());
    }

    #[test]
    fn test_active_within_window() {
        let mut probation = ProbationWindow::new(Duration::from_secs(5));
        let t0 = Instant::now();
        probation.activate("switch:v1->v2", t0);

        assert!(probation.is_active(t0));
        assert!(probation.is_active(t0 + Duration::from_secs(5)));
        assert_eq!(probation.reason(), Some("switch:v1->v2"));
    }

    #[test]
    fn test_expiry_happens_once() {
        let mut probation = ProbationWindow::new(Duration::from_secs(5));
        let t0 = Instant::now();
        probation.activate("switch", t0);

        let after = t0 + Duration::from_millis(5001);
        assert!(!probation.is_active(after));
        assert!(probation.until().is_none(), "Expired window is cleared");
        assert!(!probation.is_active(after + Duration::from_secs(1)));
        assert!(probation.reason().is_none());
    }

    #[test]
    fn test_reactivation_extends() {
        let mut probation = ProbationWindow::new(Duration::from_secs(5));
        let t0 = Instant::now();
        probation.activate("first", t0);
        probation.activate("second", t0 + Duration::from_secs(4));

        assert!(probation.is_active(t0 + Duration::from_secs(8)));
        assert_eq!(probation.reason(), Some("second"));
    }
}
