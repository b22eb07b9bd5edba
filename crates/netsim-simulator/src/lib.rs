pub mod driver;
pub mod engine;
pub mod scenario_runner;
pub mod storage;
pub mod store;
pub mod ticker;
pub mod trace;

#[cfg(feature = "tui")]
pub mod tui;

pub use driver::{RunOptions, run_headless};
pub use engine::{StepInput, StepOutcome, TrendState, step};
pub use storage::{JsonFileStorage, MemoryStorage, StorageError, UserStorage};
pub use store::{SimulationStore, StoreError};
pub use ticker::Ticker;
pub use trace::{RunSummary, SimulationReport};
