pub mod cache;

pub use cache::TimelineCache;
