pub mod config;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod geo_index;
pub mod matching;
pub mod queue;
pub mod ride;
pub mod store;
pub mod transition;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
