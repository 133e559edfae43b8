use crate::state::SessionPhase;
use crate::HarvestError;

/// Tracks one collection session while it runs
///
/// This is never persisted. A resumed run starts from a fresh `SessionState`
/// and relies on the checkpoint for everything that must survive.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Cursor for the next fetch; empty for the first page
    pub cursor: String,

    /// Items returned by the fetcher during this run, duplicates included
    pub fetched_this_run: usize,

    /// Pages fetched successfully during this run
    pub pages_fetched: u32,

    /// Pages fetched since the last long break
    pub pages_since_break: u32,

    /// Rate-limit signals observed during this run
    pub rate_limit_events: u32,

    /// Consecutive failures on the current page
    pub page_failures: u32,

    /// Current phase
    pub phase: SessionPhase,
}

impl SessionState {
    /// Creates a state positioned before the first page
    pub fn new() -> Self {
        Self {
            cursor: String::new(),
            fetched_this_run: 0,
            pages_fetched: 0,
            pages_since_break: 0,
            rate_limit_events: 0,
            page_failures: 0,
            phase: SessionPhase::Init,
        }
    }

    /// Moves to another phase
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The move is legal and has been applied
    /// * `Err(HarvestError::InvalidTransition)` - The move is illegal; the phase is unchanged
    pub fn transition(&mut self, to: SessionPhase) -> Result<(), HarvestError> {
        if !self.phase.can_transition_to(to) {
            return Err(HarvestError::InvalidTransition {
                from: self.phase,
                to,
            });
        }

        self.phase = to;
        Ok(())
    }

    /// Records a successful page of `items` items
    ///
    /// Clears the failure count for the page that just succeeded.
    pub fn record_page(&mut self, items: usize) {
        self.fetched_this_run += items;
        self.pages_fetched += 1;
        self.pages_since_break += 1;
        self.page_failures = 0;
    }

    /// Records a rate-limit signal and returns how many were seen before it
    pub fn record_rate_limit(&mut self) -> u32 {
        let observed = self.rate_limit_events;
        self.rate_limit_events += 1;
        observed
    }

    /// Records a failed attempt on the current page and returns the new count
    pub fn record_page_failure(&mut self) -> u32 {
        self.page_failures += 1;
        self.page_failures
    }

    /// Moves to the next cursor
    pub fn advance(&mut self, cursor: String) {
        self.cursor = cursor;
        self.page_failures = 0;
    }

    /// Restarts the long-break countdown
    pub fn reset_break_counter(&mut self) {
        self.pages_since_break = 0;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
