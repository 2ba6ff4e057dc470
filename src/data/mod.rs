//! Samples, live history and durable logs.

pub mod durable_log;
pub mod history;
pub mod sample;

pub use durable_log::{recompress_file, DurableLog};
pub use history::HistoryCache;
pub use sample::{FieldValue, Sample, SampleSchema, TIMESTAMP_FORMAT};
