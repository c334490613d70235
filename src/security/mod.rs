pub mod input_validation;

pub use input_validation::InputValidator;

/// Inclusive bounds on the number of concurrent fetch workers per job.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 20;
