pub mod cache;
pub mod client;
pub mod errors;
pub mod hub;
pub mod logging;
pub mod opsboard_config;
pub mod producers;
pub mod protocol;
pub mod server;
pub mod watch;
