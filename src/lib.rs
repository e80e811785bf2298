pub mod config;
pub mod example;

pub use config::ServiceConfig;
