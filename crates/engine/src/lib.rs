pub mod binance;
pub mod executor;
pub mod lifecycle;
pub mod reconcile;
pub mod scheduler;
pub mod store;

pub use binance::{BinanceFuturesClient, MarkPriceStream};
pub use executor::{ChildOrderExecutor, SlotOutcome};
pub use lifecycle::{Engine, EngineHandle};
pub use reconcile::{ReconcileReport, ReconciliationLoop};
pub use scheduler::ExecutionScheduler;
pub use store::{MemoryStore, SqliteStore};
