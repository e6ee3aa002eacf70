//! Run outputs: per-worker CSV streams and the JSON summary

pub mod csv;
pub mod json;
