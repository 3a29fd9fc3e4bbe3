pub mod config;
pub mod error;
pub mod persistence;
pub mod soft_delete;
pub mod test_utils;
pub mod types;

#[cfg(feature = "api")]
pub mod api;
