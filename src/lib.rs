pub mod config;
pub mod geo;
pub mod location;
pub mod logging;
pub mod map;
pub mod server;
pub mod venues;
