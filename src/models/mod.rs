//! Data models for the collector.

mod candidate;
mod category;

pub use candidate::{AcceptedImage, Candidate};
pub use category::{
    normalize_label, Category, CategoryError, CategoryKind, CategorySet, DEFAULT_TARGET_FRUITS,
    EXOTIC_FRUITS, NOT_FRUIT, UNKNOWN_FRUIT,
};
