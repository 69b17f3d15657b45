use thiserror::Error;

/// Reasons new work is refused at submission time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("batch of {requested} candidates exceeds the current limit of {limit}")]
    BatchTooLarge { requested: usize, limit: usize },

    #[error("file of {size} bytes exceeds the current limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("memory usage at {percentage:.1}% is above the critical threshold")]
    MemoryCritical { percentage: f64 },
}
