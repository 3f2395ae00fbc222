//! Data models for consultant records.

pub mod consultant;

pub use consultant::Consultant;
