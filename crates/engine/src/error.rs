use std::path::PathBuf;
use thiserror::Error;

use crate::supervisor::SupervisorError;

/// Conditions that make any further batch progress impossible. Everything
/// else is reported per item and the batch moves on.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot create output directory {dir}: {source}")]
    OutputDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tool(#[from] SupervisorError),
}
