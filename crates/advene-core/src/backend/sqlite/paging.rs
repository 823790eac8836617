//! Shared connection and paged, flush-capable row iterators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use tracing::debug;

use crate::backend::flush::{Flush, FlushRegistry};
use crate::backend::{Rows, StorageError};
use crate::error::{Error, Result};

pub(crate) type RowMapper<T> = fn(&Row<'_>) -> rusqlite::Result<T>;

/// A connection shared by every package bound to one physical store
pub(crate) struct Shared {
    path: String,
    conn: RefCell<Option<Connection>>,
    iterators: FlushRegistry,
    batch_size: usize,
}

impl Shared {
    pub fn new(path: &str, conn: Connection, batch_size: usize) -> Self {
        Self {
            path: path.to_string(),
            conn: RefCell::new(Some(conn)),
            iterators: FlushRegistry::default(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.borrow().is_some()
    }

    fn closed(&self) -> Error {
        StorageError::Closed {
            path: self.path.clone(),
        }
        .into()
    }

    /// Run a read against the connection
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.borrow();
        let conn = conn.as_ref().ok_or_else(|| self.closed())?;
        f(conn)
    }

    /// Run a single-statement write, after flushing live iterators
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.iterators.flush_all()?;
        self.read(f)
    }

    /// Run `f` in a transaction; any error rolls it back
    pub fn transaction<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.iterators.flush_all()?;
        let mut conn = self.conn.borrow_mut();
        let conn = conn.as_mut().ok_or_else(|| self.closed())?;
        let tx = conn.transaction_with_behavior(behavior)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                debug!("rolling back transaction on {}: {}", self.path, err);
                // dropping the transaction rolls it back
                drop(tx);
                Err(err)
            }
        }
    }

    /// Flush iterators and drop the connection
    pub fn release(&self) -> Result<()> {
        self.iterators.flush_all()?;
        if self.conn.borrow_mut().take().is_some() {
            debug!("released connection to {}", self.path);
        }
        Ok(())
    }

    /// Lazily paged iterator over `sql`, registered for flushing
    pub fn rows<T: 'static>(
        self: &Rc<Self>,
        sql: String,
        params: Vec<Value>,
        map: RowMapper<T>,
    ) -> Rows<T> {
        let source = Rc::new(PagedQuery {
            shared: Rc::clone(self),
            sql,
            params,
            map,
            state: RefCell::new(PageState {
                buffer: VecDeque::new(),
                offset: 0,
                exhausted: false,
            }),
        });
        let weak = Rc::downgrade(&source);
        self.iterators.register(weak);
        Box::new(PagedRows { source })
    }

    #[cfg(test)]
    pub fn live_iterators(&self) -> usize {
        self.iterators.live_count()
    }
}

struct PageState<T> {
    buffer: VecDeque<T>,
    /// Rows already read from the database
    offset: usize,
    exhausted: bool,
}

struct PagedQuery<T> {
    shared: Rc<Shared>,
    sql: String,
    params: Vec<Value>,
    map: RowMapper<T>,
    state: RefCell<PageState<T>>,
}

impl<T> PagedQuery<T> {
    /// Read up to `limit` more rows (`None` for all remaining)
    fn fetch(&self, limit: Option<usize>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.exhausted {
            return Ok(());
        }
        let sql = format!("{} LIMIT ? OFFSET ?", self.sql);
        let mut params = self.params.clone();
        params.push(Value::Integer(limit.map_or(-1, |l| l as i64)));
        params.push(Value::Integer(state.offset as i64));

        let rows: Vec<T> = self.shared.read(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), self.map)?
                .collect::<rusqlite::Result<Vec<T>>>()?;
            Ok(rows)
        })?;

        state.offset += rows.len();
        if limit.map_or(true, |l| rows.len() < l) {
            state.exhausted = true;
        }
        state.buffer.extend(rows);
        Ok(())
    }
}

impl<T> Flush for PagedQuery<T> {
    fn flush(&self) -> Result<()> {
        self.fetch(None)
    }
}

struct PagedRows<T> {
    source: Rc<PagedQuery<T>>,
}

impl<T> Iterator for PagedRows<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let empty = self.source.state.borrow().buffer.is_empty();
        if empty {
            if let Err(err) = self.source.fetch(Some(self.source.shared.batch_size)) {
                // stop after reporting the failure once
                self.source.state.borrow_mut().exhausted = true;
                return Some(Err(err));
            }
        }
        self.source.state.borrow_mut().buffer.pop_front().map(Ok)
    }
}
