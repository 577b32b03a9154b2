//! vmsampler: discover the counters a line-oriented key/value file carries,
//! publish them as a fixed-layout metric set, and refresh that set from fresh
//! reads of the same file.

pub mod agent;
pub mod config;
pub mod export;
pub mod metric_set;
pub mod pid;
pub mod sampler;
pub mod schema;
pub mod source;
pub mod table;
