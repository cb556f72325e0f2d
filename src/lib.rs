pub mod config;
pub mod csv_input;
pub mod engine;
pub mod error;
pub mod export;
pub mod merge;
pub mod normalize;
pub mod scheduler;
pub mod table;
pub mod timeline;
pub mod window_stats;

pub use config::EngineConfig;
pub use engine::{EngineOutput, RunHooks, RunReport, run, run_with};
pub use error::{ComputeError, EngineError, InputError};
pub use table::{Cell, OutputTable, RawTable};
