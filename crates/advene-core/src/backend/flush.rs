//! Flush-capable iterators
//!
//! Backend iterators read their rows lazily. Before a backend writes, it
//! asks every iterator still alive on the same store to buffer the rows it
//! has not yet handed out, so the write cannot shift, lose or duplicate
//! results of an iteration already in progress.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::error::Result;

/// Something holding unread rows that can be materialized on demand
pub trait Flush {
    /// Read every remaining row into memory
    fn flush(&self) -> Result<()>;
}

/// Weak registry of the live iterators of one store
#[derive(Default)]
pub struct FlushRegistry {
    live: RefCell<Vec<Weak<dyn Flush>>>,
}

impl FlushRegistry {
    pub fn register(&self, source: Weak<dyn Flush>) {
        let mut live = self.live.borrow_mut();
        live.retain(|w| w.strong_count() > 0);
        live.push(source);
    }

    /// Flush every registered iterator that is still alive
    ///
    /// All of them are tried; those that fail stay registered and the first
    /// error is returned.
    pub fn flush_all(&self) -> Result<()> {
        let sources: Vec<Rc<dyn Flush>> = {
            let mut live = self.live.borrow_mut();
            let sources: Vec<_> = live.iter().filter_map(Weak::upgrade).collect();
            live.clear();
            sources
        };
        if !sources.is_empty() {
            debug!("flushing {} live iterator(s)", sources.len());
        }
        let mut first_error = None;
        let mut pending: Vec<Weak<dyn Flush>> = Vec::new();
        for source in sources {
            if let Err(e) = source.flush() {
                warn!("iterator flush failed: {}", e);
                pending.push(Rc::downgrade(&source));
                first_error.get_or_insert(e);
            }
        }
        if !pending.is_empty() {
            self.live.borrow_mut().extend(pending);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}
