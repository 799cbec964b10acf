//! Threaded interface for submitting and controlling filter reads.
//!
//! A minimal thread-per-query runner: it parses the filter up front,
//! evaluates it on a background thread, and streams matching entities back
//! over a channel. Cancellation is cooperative through an
//! `Arc<AtomicBool>` checked before every row; a timeout is checked on the
//! same cadence.
//!
//! This keeps threading concerns out of the evaluator itself. The core
//! stays synchronous; callers that want a blocking read just use
//! [`crate::filter::Filter::filter_grid`] directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::datatype::Dict;
use crate::error::Result;
use crate::filter::Filter;
use crate::grid::Grid;

/// Cancellation token shared with the worker thread.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque query identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(u64);

/// Handle to a running or completed query.
pub struct QueryHandle {
    pub id: QueryId,
    cancel: CancelToken,
    started: Instant,
    join: Option<JoinHandle<()>>,
    pub results: Receiver<Dict>,
}

impl QueryHandle {
    /// Request cancellation (cooperative). The worker observes it at the
    /// next row boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    /// Wait for the query to finish.
    pub fn join(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Query submission options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub timeout: Option<Duration>,
}

/// Registry managing query lifecycles over a shared entity set.
pub struct QueryInterface {
    grid: Arc<Grid>,
    next_id: Mutex<u64>,
    active: Mutex<HashMap<QueryId, CancelToken>>,
}

impl QueryInterface {
    pub fn new(grid: Arc<Grid>) -> Self {
        Self {
            grid,
            next_id: Mutex::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn allocate_id(&self) -> QueryId {
        let mut guard = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
        *guard += 1;
        QueryId(*guard)
    }

    /// Parses `filter` and starts evaluating it on a background thread.
    /// Parse errors surface immediately, before any thread is spawned.
    pub fn start_query(&self, filter: &str, options: QueryOptions) -> Result<QueryHandle> {
        let filter = Filter::parse(filter)?;
        let id = self.allocate_id();
        let cancel = CancelToken::new();
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, cancel.clone());

        let (tx, rx): (Sender<Dict>, Receiver<Dict>) = mpsc::channel();
        let grid = Arc::clone(&self.grid);
        let cancel_for_thread = cancel.clone();
        let timeout = options.timeout;
        let started = Instant::now();
        let join = thread::spawn(move || {
            let mut sent = 0usize;
            for row in filter.filter_grid(&grid) {
                if cancel_for_thread.is_cancelled() {
                    break;
                }
                if let Some(limit) = timeout {
                    if started.elapsed() > limit {
                        break;
                    }
                }
                if tx.send(row.clone()).is_err() {
                    // Receiver hung up; nothing left to do.
                    break;
                }
                sent += 1;
            }
            debug!(rows = sent, "query finished");
        });

        Ok(QueryHandle {
            id,
            cancel,
            started,
            join: Some(join),
            results: rx,
        })
    }

    /// Cancel a query by id. Returns false for unknown ids.
    pub fn cancel(&self, id: QueryId) -> bool {
        match self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
