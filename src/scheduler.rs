//! Fixed-cadence repetition of whole capture sessions.
//!
//! A failed session is logged and counted; the next one starts on schedule.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::session::SessionOutcome;

pub struct Scheduler {
    interval: Duration,
    runs: u64,
    saved: u64,
    failures: u64,
    worst_case: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            runs: 0,
            saved: 0,
            failures: 0,
            worst_case: Duration::ZERO,
        }
    }

    /// Run one session and record how it went
    pub fn tick<F>(&mut self, session: F) -> Option<SessionOutcome>
    where
        F: FnOnce() -> Result<SessionOutcome>,
    {
        let start = Instant::now();
        let result = session();
        let elapsed = start.elapsed();

        self.runs += 1;
        if elapsed > self.worst_case {
            self.worst_case = elapsed;
        }
        if elapsed > self.interval {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = self.interval.as_millis() as u64,
                "Session overran the capture interval"
            );
        }

        match result {
            Ok(outcome) => {
                if outcome.photograph_id().is_some() {
                    self.saved += 1;
                }
                Some(outcome)
            }
            Err(e) => {
                self.failures += 1;
                tracing::error!(run = self.runs, error = %e, "Scheduled session failed");
                None
            }
        }
    }

    /// Run sessions every `interval` until `max_runs` (forever if `None`)
    pub fn run<F>(&mut self, max_runs: Option<u64>, mut session: F)
    where
        F: FnMut() -> Result<SessionOutcome>,
    {
        loop {
            let cycle_start = Instant::now();

            self.tick(&mut session);

            if max_runs.is_some_and(|max| self.runs >= max) {
                break;
            }

            let elapsed = cycle_start.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }

        tracing::info!(
            runs = self.runs,
            saved = self.saved,
            failures = self.failures,
            worst_case_ms = self.worst_case.as_millis() as u64,
            "Scheduler stopped"
        );
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}
