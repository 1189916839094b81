pub mod grading;
pub mod job;
pub mod rubric;
