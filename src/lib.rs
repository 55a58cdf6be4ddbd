//! Jam Hot collector - training image acquisition for the fruit classifier.
//!
//! Pulls candidate images from several sources, never downloads a URL twice,
//! filters candidates before storing them, and learns how many URLs it needs
//! per accepted image.

pub mod cli;
pub mod collector;
pub mod config;
pub mod dedup;
pub mod models;
pub mod quality;
pub mod sampler;
pub mod scrapers;
pub mod storage;
