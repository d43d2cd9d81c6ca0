pub mod auth;
pub mod error;
pub mod profile;
pub mod recommendation;
pub mod storage;
