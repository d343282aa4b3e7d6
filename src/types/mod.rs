pub mod field;
pub mod observation;
pub mod request;
pub mod source;
pub mod units;
