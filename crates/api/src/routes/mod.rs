mod error;
mod health;
mod orders;
mod runs;

pub use error::ApiError;
pub use health::health_router;
pub use orders::orders_router;
pub use runs::runs_router;
