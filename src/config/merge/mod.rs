//! Config composition: defaults plus source layering.

pub(crate) mod merge_policy;
pub mod service;
