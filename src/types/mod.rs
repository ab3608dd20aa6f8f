/// Raw API payloads
pub mod chain;
/// Amount conversions
pub mod conversions;
/// Domain records produced by the crawlers and pipelines
pub mod domain;

pub use domain::*;
