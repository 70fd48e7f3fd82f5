//! Activity logging: JSONL lines written by a dedicated logger thread.

pub mod activity;
pub mod jsonl;
