pub mod config;
pub mod error;
pub mod server;
pub mod telemetry;
pub mod xades;
pub mod xml;
