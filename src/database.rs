//! Database facade consumed by the protocol layer.
//!
//! The server never looks inside the engine. Everything it does to data goes through
//! the three traits defined here:
//!
//! - [`Database`]: process-wide operations (schema changes, transactions, cursors,
//!   libraries, bulk dump/load, credentials).
//! - [`Transaction`]: one storage transaction, read-only or update.
//! - [`Query`]: a compiled query. A query can be bound to the transaction it was
//!   created under or, for cursors, be handed a transaction on every call; in both
//!   cases the transaction is passed explicitly to [`Query::get`] and [`Query::output`].
//!
//! [`MemoryDatabase`](crate::storage::MemoryDatabase) is the in-process implementation
//! used by the server binary and the tests.
use std::io;

use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("nonexistent table: {0}")]
    UnknownTable(String),

    #[error("table already exists: {0}")]
    DuplicateTable(String),

    #[error("nonexistent column '{column}' in {table}")]
    UnknownColumn { table: String, column: String },

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("duplicate key {key} in {table}")]
    DuplicateKey { table: String, key: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("record {0} not found")]
    RecordNotFound(i64),

    #[error("cannot {0} in a read-only transaction")]
    ReadOnly(&'static str),

    #[error("transaction has already ended")]
    Ended,

    #[error("commit failed: {0}")]
    Conflict(String),

    #[error("no dump directory configured")]
    NoDirectory,

    #[error("storage io error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Iteration direction for [`Query::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Next,
    Prev,
}

/// A record together with its address in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub address: i64,
    pub record: Vec<u8>,
}

pub trait Database: Send + Sync {
    /// Runs a schema change request.
    fn admin(&self, request: &str) -> DbResult<()>;

    fn transaction(&self, update: bool) -> DbResult<Box<dyn Transaction>>;

    /// Compiles a query that is not bound to any transaction.
    fn cursor(&self, query: &str) -> DbResult<Box<dyn Query>>;

    /// Libraries currently in use, in search order.
    fn libraries(&self) -> Vec<String>;

    /// Returns `false` if the library was already in use.
    fn use_library(&self, library: &str) -> DbResult<bool>;

    /// Returns `false` if the library was not in use.
    fn unuse_library(&self, library: &str) -> DbResult<bool>;

    /// Packed source of `name` from every library in use that defines it.
    fn libget(&self, name: &str) -> DbResult<Vec<(String, Vec<u8>)>>;

    /// Exports a table, or every table for an empty name. Returns the rows written.
    fn dump(&self, table: &str) -> DbResult<i64>;

    /// Imports a table previously written by [`Database::dump`].
    fn load(&self, table: &str) -> DbResult<i64>;

    /// Integrity check. An empty string means no problems were found.
    fn check(&self) -> DbResult<String>;

    fn size(&self) -> i64;

    /// A packed, strictly increasing date-time.
    fn timestamp(&self) -> Vec<u8>;

    /// Stored password hash for `user`, if the user exists.
    fn password_hash(&self, user: &str) -> Option<Vec<u8>>;
}

pub trait Transaction: Send {
    fn is_update(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn query(&mut self, query: &str) -> DbResult<Box<dyn Query>>;

    /// Rows of `table` as seen by this transaction. Used by query implementations.
    fn visible_rows(&mut self, table: &str) -> DbResult<Vec<Row>>;

    /// Adds a record, returning its address.
    fn output(&mut self, table: &str, record: &[u8]) -> DbResult<i64>;

    /// Replaces the record at `address`, returning the new record's address.
    fn update(&mut self, address: i64, record: &[u8]) -> DbResult<i64>;

    fn erase(&mut self, address: i64) -> DbResult<()>;

    /// Runs an update action, returning the number of records affected.
    fn request(&mut self, action: &str) -> DbResult<i64>;

    /// Commits. `Ok(Some(conflict))` means the transaction could not commit and has
    /// been aborted.
    fn complete(&mut self) -> DbResult<Option<String>>;

    fn abort(&mut self);

    fn read_count(&self) -> i64;

    fn write_count(&self) -> i64;
}

pub trait Query: Send {
    fn header(&self) -> Vec<String>;

    fn keys(&self) -> Vec<Vec<String>>;

    fn ordering(&self) -> Vec<String>;

    fn rewind(&mut self);

    /// Next or previous row. `None` at either end, after which the query is rewound.
    fn get(&mut self, tran: &mut dyn Transaction, dir: Dir) -> DbResult<Option<Row>>;

    fn output(&mut self, tran: &mut dyn Transaction, record: &[u8]) -> DbResult<()>;

    fn explain(&self) -> String;

    fn close(&mut self);
}
