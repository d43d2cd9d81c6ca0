pub mod avatar;
pub mod backend;
pub mod config;
pub mod memory;
pub mod notifications;
pub mod profile;
pub mod recommendation;
pub mod remote_client;
pub mod session;
pub mod settings;
pub mod validation;
