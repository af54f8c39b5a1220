//! The CKB index server: HTTP hosting of per-repository code-knowledge
//! indexes built from SCIP indexer output.

pub mod admission;
pub mod api;
pub mod config;
pub mod cursor;
pub mod logging;
pub mod manager;
pub mod metrics_server;
pub mod redact;
pub mod server;

use admission::{CircuitBreaker, LoadShedder};
use config::Config;
use cursor::CursorCodec;
use manager::RepoManager;
use redact::Redactor;

/// Shared server state, one per process.
pub struct App {
    pub config: Config,
    pub manager: RepoManager,
    pub cursors: CursorCodec,
    pub redactor: Redactor,
    pub shedder: LoadShedder,
    pub breaker: CircuitBreaker,
}

impl App {
    pub fn new(config: Config, manager: RepoManager, cursors: CursorCodec) -> Self {
        Self {
            redactor: Redactor::new(config.redact.clone()),
            shedder: LoadShedder::new(config.shedder.clone()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            config,
            manager,
            cursors,
        }
    }
}
