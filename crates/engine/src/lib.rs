// Batch transcode orchestrator: turns a declarative encoding request into
// a sequence of external-tool invocations with live status events.

pub mod cancel;
pub mod capability;
pub mod command;
pub mod duration;
pub mod error;
pub mod naming;
pub mod runner;
pub mod scan;
pub mod spec;
pub mod supervisor;
pub mod tools;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use error::EngineError;
pub use runner::{run_batch, spawn_batch, BatchEvent, BatchHandle};
pub use spec::{CodecParams, EncodeJobSpec, RateControl, TrimWindow};
pub use tools::ToolPaths;
