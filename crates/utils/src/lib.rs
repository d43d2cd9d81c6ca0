pub mod api;
pub mod log;
