//! Lyric harvest library - shared modules for the pipeline binary.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod ledger;
pub mod pipeline;
pub mod progress;
pub mod store;
