pub mod endpoints;
pub mod error;
pub mod fetcher;
pub mod field_table;
pub mod http;
pub mod registry;
pub(crate) mod payload;
