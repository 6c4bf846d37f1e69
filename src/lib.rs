pub mod audit;
pub mod chain;
pub mod config;
pub mod error;
pub mod server;
pub mod state;
