//! Progress tracking and reply filtering for the trigonometry tutor A/B study.
//!
//! [`sectioner`] hides the tutor's internal observations from students while
//! keeping the full reply for audit. [`tracker`] counts distinct interaction
//! days per student and unlocks the final assessment.

pub mod assessment;
pub mod comparison;
pub mod config;
pub mod db;
pub mod models;
pub mod report;
pub mod sectioner;
pub mod session;
pub mod store;
pub mod tracker;
pub mod transcript;
