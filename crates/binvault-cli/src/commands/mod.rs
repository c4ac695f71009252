//! Command handlers

pub mod attachment;
pub mod collection;
pub mod config;
pub mod maintenance;
pub mod status;
pub mod sync;
