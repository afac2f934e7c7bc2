//! HTTP API handlers for otoge-sync

pub mod auth;
pub mod chains;
pub mod developers;
pub mod health;
pub mod scores;

pub use auth::developer_gate;
pub use chains::chain_routes;
pub use developers::developer_routes;
pub use health::health_routes;
pub use scores::score_routes;
