pub mod grading;
pub mod scheduler;
