//! Seam between queue workers and whatever decides if new work may start.

/// Gate consulted by workers before they take a job.
pub trait AdmissionGate: Send + Sync + 'static {
    /// Cheap pre-check before asking the queue for work.
    fn can_admit(&self) -> bool;

    /// Atomically check and register `job_id` as running.
    fn try_admit(&self, job_id: &str) -> bool;

    /// Release a job previously admitted.
    fn release(&self, job_id: &str);
}

/// Gate that admits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl AdmissionGate for OpenGate {
    fn can_admit(&self) -> bool {
        true
    }

    fn try_admit(&self, _job_id: &str) -> bool {
        true
    }

    fn release(&self, _job_id: &str) {}
}
