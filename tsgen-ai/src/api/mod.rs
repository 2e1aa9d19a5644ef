//! HTTP API handlers for tsgen-ai

pub mod generate;
pub mod health;
pub mod review;
pub mod sources;

pub use generate::generate_routes;
pub use health::health_routes;
pub use review::review_routes;
pub use sources::source_routes;
