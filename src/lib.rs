pub mod cache;
pub mod charts;
pub mod config;
pub mod generator;
pub mod index;
pub mod logging;
pub mod reconcile;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_utils;
