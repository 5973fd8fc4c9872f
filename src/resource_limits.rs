//! Request admission for the retrieval server.
//!
//! Read and write tools draw from separate slot pools. Reads are cheap and
//! plentiful; writes all funnel into the per-collection store lock, so
//! admitting many of them only builds an invisible queue inside the daemon
//! — better to refuse early with a structured error the client can retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Read,
    Write,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestGate {
    read_limit: usize,
    write_limit: usize,
    active_reads: Arc<AtomicUsize>,
    active_writes: Arc<AtomicUsize>,
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new(96, 8)
    }
}

impl RequestGate {
    pub fn new(read_limit: usize, write_limit: usize) -> Self {
        Self {
            read_limit,
            write_limit,
            active_reads: Arc::new(AtomicUsize::new(0)),
            active_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Admit a request or refuse with the current load. The returned guard
    /// frees the slot on drop, so early returns in handlers need no
    /// bookkeeping.
    pub fn try_admit(&self, class: RequestClass) -> Result<Admission, AdmissionError> {
        let (counter, limit) = match class {
            RequestClass::Read => (&self.active_reads, self.read_limit),
            RequestClass::Write => (&self.active_writes, self.write_limit),
        };
        let previous = counter.fetch_add(1, Ordering::SeqCst);
        if previous >= limit {
            counter.fetch_sub(1, Ordering::SeqCst);
            return Err(AdmissionError::Saturated {
                class,
                active: previous,
                limit,
            });
        }
        Ok(Admission {
            counter: counter.clone(),
        })
    }

    pub fn active_reads(&self) -> usize {
        self.active_reads.load(Ordering::SeqCst)
    }

    pub fn active_writes(&self) -> usize {
        self.active_writes.load(Ordering::SeqCst)
    }
}

/// RAII admission slip; dropping it releases the slot.
pub struct Admission {
    counter: Arc<AtomicUsize>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("{} pool saturated: {active}/{limit} in flight; retry shortly", class.as_str())]
    Saturated {
        class: RequestClass,
        active: usize,
        limit: usize,
    },
}
