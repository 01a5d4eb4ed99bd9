//! CLI command implementations.

pub mod common;
pub mod db;
pub mod replay;
pub mod report;
