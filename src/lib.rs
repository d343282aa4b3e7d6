mod catalog;
mod config;
mod error;
mod firewx;
mod observations;
mod products;
mod retrieval;
mod timing;
mod types;
mod utils;

pub use config::*;
pub use error::FireWxError;
pub use firewx::*;

pub use catalog::endpoints::*;
pub use catalog::error::{FetchError, FetchReason};
pub use catalog::fetcher::*;
pub use catalog::field_table::*;
pub use catalog::http::HttpCatalog;
pub use catalog::registry::*;

pub use timing::candidates::*;
pub use timing::observation_time::*;

pub use types::field::*;
pub use types::observation::*;
pub use types::request::*;
pub use types::source::*;
pub use types::units::*;

pub use retrieval::cache::{CacheError, OutcomeCache};
pub use retrieval::cascade::*;
pub use retrieval::error::RetrievalError;

pub use observations::error::SyncError;
pub use observations::sync::*;
pub use observations::thinning::*;

pub use products::composer::*;
pub use products::error::ProductError;
pub use products::outcome::*;

pub use utils::get_cache_dir;
