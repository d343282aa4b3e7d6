pub mod candidates;
pub mod observation_time;
