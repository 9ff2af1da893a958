//! Variable-change trackers.
//!
//! A tracker groups a caller-chosen set of stream variables so that "did
//! any of these change since the last record" is one query, and so that a
//! filtering pipeline can replicate unmodified metadata wholesale into an
//! output stream. Switch characters on registration choose the behaviors:
//! `u` marks the variable for update reporting, `c` marks it for copying.

use crate::error::{MiriadError, Result};

/// Handle to one tracker registered on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerId(pub(crate) usize);

pub(crate) struct TrackEntry {
    pub var: usize,
    pub report_updates: bool,
    pub copy: bool,
}

#[derive(Default)]
pub(crate) struct Tracker {
    pub entries: Vec<TrackEntry>,
}

impl Tracker {
    /// Register a variable, merging switches on repeat registration.
    pub fn track(&mut self, var: usize, switches: &str) -> Result<()> {
        let mut report_updates = false;
        let mut copy = false;
        for ch in switches.chars() {
            match ch {
                'u' => report_updates = true,
                'c' => copy = true,
                other => {
                    return Err(MiriadError::validation(format!(
                        "unrecognized tracker switch {other:?}"
                    )))
                }
            }
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.var == var) {
            entry.report_updates |= report_updates;
            entry.copy |= copy;
        } else {
            self.entries.push(TrackEntry {
                var,
                report_updates,
                copy,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_parsing() {
        let mut tracker = Tracker::default();
        tracker.track(0, "u").unwrap();
        tracker.track(1, "uc").unwrap();
        assert!(tracker.entries[0].report_updates);
        assert!(!tracker.entries[0].copy);
        assert!(tracker.entries[1].copy);
        assert!(tracker.track(2, "x").is_err());
    }

    #[test]
    fn test_repeat_registration_merges() {
        let mut tracker = Tracker::default();
        tracker.track(3, "u").unwrap();
        tracker.track(3, "c").unwrap();
        assert_eq!(tracker.entries.len(), 1);
        assert!(tracker.entries[0].report_updates);
        assert!(tracker.entries[0].copy);
    }
}
