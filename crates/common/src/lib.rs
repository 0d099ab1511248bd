pub mod config;
pub mod error;
pub mod exchange;
pub mod store;
pub mod types;
pub mod validate;

pub use config::{ClientConfig, Config, EngineConfig};
pub use error::{Error, ErrorKind, Result};
pub use exchange::ExchangeGateway;
pub use store::{OrderLedger, RunRepository};
pub use types::*;
pub use validate::Validator;
