pub mod config;
pub mod error;
pub mod shutdown;
pub mod state;
pub mod routes;
pub mod downstream;
pub mod ambassador_routes;
