pub mod api;
pub mod config;
pub mod error;
pub mod handler_factory;
pub mod state_factory;
