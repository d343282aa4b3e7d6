pub mod cache;
pub mod cascade;
pub mod error;
