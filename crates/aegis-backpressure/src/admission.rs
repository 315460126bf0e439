//! Request-path admission interface.

use crate::error::Rejection;

/// Proof that a job was admitted. Hand it back through
/// [`AdmissionControl::complete`] when the job ends.
#[derive(Debug)]
#[must_use = "an admitted job holds a concurrency slot until completed"]
pub struct AdmissionTicket {
    probe: bool,
    epoch: u64,
}

impl AdmissionTicket {
    pub(crate) fn new(probe: bool, epoch: u64) -> Self {
        Self { probe, epoch }
    }

    /// Admitted as a recovery probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure,
}

impl From<bool> for JobOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            JobOutcome::Success
        } else {
            JobOutcome::Failure
        }
    }
}

/// Gatekeeper consulted before starting expensive work.
pub trait AdmissionControl: Send + Sync {
    fn try_admit(&self) -> Result<AdmissionTicket, Rejection>;

    fn complete(&self, ticket: AdmissionTicket, outcome: JobOutcome);
}

/// Admits everything. Used when backpressure is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAdmission;

impl AdmissionControl for OpenAdmission {
    fn try_admit(&self) -> Result<AdmissionTicket, Rejection> {
        Ok(AdmissionTicket::new(false, 0))
    }

    fn complete(&self, _ticket: AdmissionTicket, _outcome: JobOutcome) {}
}
