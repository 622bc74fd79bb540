//! Live/captured scan state shared by the CLI and any other front end.

use thiserror::Error;

use crate::types::{BodyMetrics, Sample};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("current scan is not valid enough to capture")]
    InvalidScan,
    #[error("measurements are already captured")]
    AlreadyCaptured,
    #[error("Please capture your body measurements first")]
    NotCaptured,
    #[error("a diet plan request is already in progress")]
    RequestInFlight,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScanState {
    /// Metrics follow every sampling cycle.
    Live,
    /// A frozen snapshot; sampling output is kept but not displayed.
    Captured(Sample),
}

/// One outstanding diet request, tied to the snapshot it was started for.
#[derive(Clone, Debug, PartialEq)]
pub struct DietRequest {
    pub ticket: u64,
    pub metrics: BodyMetrics,
}

#[derive(Clone, Debug)]
pub struct ScanSession {
    live: Sample,
    state: ScanState,
    diet_plan: Option<String>,
    /// Ticket of the request in flight, if any.
    pending: Option<u64>,
    next_ticket: u64,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            live: Sample::default(),
            state: ScanState::Live,
            diet_plan: None,
            pending: None,
            next_ticket: 0,
        }
    }

    pub fn update_live(&mut self, sample: Sample) {
        self.live = sample;
    }

    pub fn live(&self) -> &Sample {
        &self.live
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn is_captured(&self) -> bool {
        matches!(self.state, ScanState::Captured(_))
    }

    pub fn captured(&self) -> Option<&Sample> {
        match &self.state {
            ScanState::Captured(sample) => Some(sample),
            ScanState::Live => None,
        }
    }

    /// What a front end should show: the snapshot when captured, else live.
    pub fn displayed(&self) -> &Sample {
        self.captured().unwrap_or(&self.live)
    }

    pub fn diet_plan(&self) -> Option<&str> {
        self.diet_plan.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// The camera is only needed while metrics are live.
    pub fn wants_camera(&self) -> bool {
        !self.is_captured()
    }

    pub fn capture(&mut self) -> Result<&BodyMetrics, SessionError> {
        if self.is_captured() {
            return Err(SessionError::AlreadyCaptured);
        }
        if !self.live.metrics.is_valid_scan {
            return Err(SessionError::InvalidScan);
        }
        log::info!("measurements captured: {}", self.live.metrics.summary_text());
        self.state = ScanState::Captured(self.live.clone());
        Ok(&self.displayed().metrics)
    }

    /// Back to live; drops the snapshot, any plan text and any request in
    /// flight for that snapshot.
    pub fn reset(&mut self) {
        self.state = ScanState::Live;
        self.diet_plan = None;
        self.pending = None;
        log::info!("measurements reset");
    }

    /// Starts a diet request for the captured snapshot. The returned ticket
    /// must be handed back to [`Self::finish_diet_request`].
    pub fn begin_diet_request(&mut self) -> Result<DietRequest, SessionError> {
        let metrics = match &self.state {
            ScanState::Captured(sample) => sample.metrics.clone(),
            ScanState::Live => return Err(SessionError::NotCaptured),
        };
        if self.pending.is_some() {
            return Err(SessionError::RequestInFlight);
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending = Some(ticket);
        self.diet_plan = None;
        Ok(DietRequest { ticket, metrics })
    }

    /// Stores the outcome of request `ticket`. Results for any other ticket
    /// (a snapshot that was reset meanwhile) are dropped.
    pub fn finish_diet_request<E: std::fmt::Display>(
        &mut self,
        ticket: u64,
        result: Result<String, E>,
    ) {
        if self.pending != Some(ticket) {
            log::info!("discarding diet plan for stale request {ticket}");
            return;
        }
        self.pending = None;
        self.diet_plan = Some(match result {
            Ok(plan) => plan,
            Err(err) => format!("Error generating diet plan: {err}"),
        });
    }
}
