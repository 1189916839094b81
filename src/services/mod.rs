pub mod ai_grading;
pub mod job_store;
pub mod llm;
pub mod pdf_render;
pub mod pdf_text;
pub mod prompt;
pub mod result_merge;
pub mod rubric_resolver;
pub mod rubric_store;
pub mod storage;
pub mod token_budget;
pub mod upload_policy;
pub mod vision_audit;
