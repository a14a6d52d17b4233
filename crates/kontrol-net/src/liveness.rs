//! Peer liveness tracking

use std::time::{Duration, Instant};

/// Locally configured authority role of a node.
///
/// Never negotiated on the wire; a node's role survives restart
/// because it is configuration, and a rejoining peer is handled the
/// same as a first-time peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    #[inline]
    pub fn is_master(self) -> bool {
        matches!(self, Role::Master)
    }
}

/// Last-ping bookkeeping for a single peer.
#[derive(Clone, Debug)]
pub struct Liveness {
    last_ping: Option<Instant>,
    keep_alive: Duration,
}

impl Liveness {
    pub fn new(keep_alive: Duration) -> Self {
        Liveness {
            last_ping: None,
            keep_alive,
        }
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// A peer is active when it declared keep-alive zero ("always on")
    /// or pinged within twice its declared interval; the factor of two
    /// tolerates one missed heartbeat. The boundary is inclusive.
    pub fn is_active_at(&self, now: Instant) -> bool {
        if self.keep_alive.is_zero() {
            return true;
        }
        match self.last_ping {
            Some(last) => now.saturating_duration_since(last) <= 2 * self.keep_alive,
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Instant::now())
    }

    /// Records a ping and the keep-alive interval it declared.
    ///
    /// Returns whether the peer was active immediately before this
    /// ping, evaluated against the newly declared interval. The
    /// last-ping timestamp only moves forward.
    pub fn note_ping_at(&mut self, now: Instant, keep_alive: Duration) -> bool {
        self.keep_alive = keep_alive;
        let was_active = self.is_active_at(now);
        if self.last_ping.map_or(true, |last| now >= last) {
            self.last_ping = Some(now);
        }
        was_active
    }

    pub fn note_ping(&mut self, keep_alive: Duration) -> bool {
        self.note_ping_at(Instant::now(), keep_alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_keep_alive_is_always_active() {
        let l = Liveness::new(Duration::ZERO);
        assert!(l.is_active_at(Instant::now()));
    }

    #[test]
    fn test_inactive_until_first_ping() {
        let l = Liveness::new(Duration::from_secs(5));
        assert!(!l.is_active_at(Instant::now()));
    }

    #[test]
    fn test_timeout_boundary_is_inclusive() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();
        l.note_ping_at(t0, Duration::from_secs(5));

        assert!(l.is_active_at(t0 + Duration::from_secs(10)));
        assert!(!l.is_active_at(t0 + Duration::from_secs(10) + Duration::from_millis(1)));
    }

    #[test]
    fn test_note_ping_reports_prior_state() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(!l.note_ping_at(t0, Duration::from_secs(5)));
        assert!(l.note_ping_at(t0 + Duration::from_secs(5), Duration::from_secs(5)));
        assert!(!l.note_ping_at(t0 + Duration::from_secs(60), Duration::from_secs(5)));
    }

    #[test]
    fn test_was_active_uses_new_keep_alive() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();
        l.note_ping_at(t0, Duration::from_secs(5));

        // 12s gap is dead for keep-alive 5 but alive for keep-alive 10
        assert!(l.note_ping_at(t0 + Duration::from_secs(12), Duration::from_secs(10)));
    }

    #[test]
    fn test_last_ping_only_moves_forward() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(3);
        l.note_ping_at(t1, Duration::from_secs(5));
        l.note_ping_at(t0, Duration::from_secs(5));

        // still measured from t1
        assert!(l.is_active_at(t1 + Duration::from_secs(10)));
    }
}
