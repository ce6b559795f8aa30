//! In-memory database engine.
//!
//! [`MemoryDatabase`] implements the [`Database`] facade entirely in process memory.
//! It backs the server binary and the test suites. Nothing is durable except what
//! DUMP writes out.
//!
//! # Model
//!
//! Committed data is a single `State` behind an `Arc`. A transaction keeps the
//! `Arc` it saw at start as its snapshot, so readers never block writers. Commit
//! takes the state lock, checks for conflicts and swaps in a modified copy.
//!
//! Record addresses come from one counter and are never reused. An update erases
//! the old address and writes the record under a new one.
//!
//! # Well-known tables
//!
//! - `users (user, passhash)`: credentials checked by AUTH.
//! - any `(name, text)` table can serve as a library once it is in use.
use std::{
    collections::BTreeMap,
    fmt::Write,
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicI64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use log::info;

use crate::{
    database::{Database, DbError, DbResult, Query, Transaction},
    protocol::auth,
};

pub mod dump;
pub mod query;
pub mod record;
pub mod table;
pub mod transaction;

use dump::DumpFile;
use query::{MemoryQuery, QuerySpec};
use record::Record;
use table::{Ddl, Table};
use transaction::MemoryTransaction;

pub const USERS_TABLE: &str = "users";

/// Leading byte of a packed timestamp.
pub const TIMESTAMP_TAG: u8 = 0x06;

#[derive(Debug, Clone, Default)]
pub(crate) struct State {
    tables: BTreeMap<String, Table>,
    /// Record address to owning table.
    locations: BTreeMap<i64, String>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<Arc<State>>,
    next_address: AtomicI64,
    libraries: Mutex<Vec<String>>,
    last_timestamp: Mutex<i64>,
    dir: Option<PathBuf>,
}

impl Shared {
    fn new(dir: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::default(),
            next_address: AtomicI64::new(1),
            libraries: Mutex::default(),
            last_timestamp: Mutex::new(0),
            dir,
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, Arc<State>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> Arc<State> {
        Arc::clone(&self.lock_state())
    }

    pub(crate) fn next_address(&self) -> i64 {
        self.next_address.fetch_add(1, Ordering::SeqCst)
    }

    fn libraries(&self) -> MutexGuard<'_, Vec<String>> {
        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self {
            shared: Arc::new(Shared::new(None)),
        }
    }
}

impl MemoryDatabase {
    /// A database whose DUMP and LOAD files live in `dir`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared::new(Some(dir.into()))),
        }
    }

    /// Adds or replaces a user's credentials.
    pub fn add_user(&self, user: &str, password: &str) -> DbResult<()> {
        if !self.shared.lock_state().tables.contains_key(USERS_TABLE) {
            self.admin(&format!("create {USERS_TABLE} (user, passhash) key(user)"))?;
        }
        let record = Record::new(vec![
            user.as_bytes().to_vec(),
            auth::password_hash(user, password),
        ]);
        let mut tran = self.transaction(true)?;
        tran.request(&format!("delete {USERS_TABLE} where user = {user:?}"))?;
        tran.output(USERS_TABLE, &record.pack()?)?;
        match tran.complete()? {
            None => Ok(()),
            Some(conflict) => Err(DbError::Conflict(conflict)),
        }
    }

    /// Creates a library table holding `(name, text)` definitions.
    pub fn add_library(&self, library: &str, definitions: &[(&str, &str)]) -> DbResult<()> {
        self.admin(&format!("create {library} (name, text) key(name)"))?;
        let mut tran = self.transaction(true)?;
        for (name, text) in definitions {
            tran.output(library, &Record::from(vec![*name, *text]).pack()?)?;
        }
        match tran.complete()? {
            None => Ok(()),
            Some(conflict) => Err(DbError::Conflict(conflict)),
        }
    }

    fn dir(&self) -> DbResult<&PathBuf> {
        self.shared.dir.as_ref().ok_or(DbError::NoDirectory)
    }

    fn dump_table(&self, state: &State, table: &str) -> DbResult<i64> {
        let committed = state
            .tables
            .get(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
        dump::write(
            self.dir()?,
            &DumpFile {
                schema: committed.schema.clone(),
                records: committed.rows.values().cloned().collect(),
            },
        )
    }
}

impl Database for MemoryDatabase {
    fn admin(&self, request: &str) -> DbResult<()> {
        let ddl = Ddl::parse(request)?;
        let mut guard = self.shared.lock_state();
        match ddl {
            Ddl::Create(schema) => {
                if guard.tables.contains_key(&schema.name) {
                    return Err(DbError::DuplicateTable(schema.name));
                }
                info!("creating table {}", schema.name);
                Arc::make_mut(&mut guard)
                    .tables
                    .insert(schema.name.clone(), Table::new(schema));
            }
            Ddl::Destroy(name) => {
                let state = Arc::make_mut(&mut guard);
                let table = state
                    .tables
                    .remove(&name)
                    .ok_or_else(|| DbError::UnknownTable(name.clone()))?;
                for address in table.rows.keys() {
                    state.locations.remove(address);
                }
                info!("destroyed table {name}");
            }
        }
        Ok(())
    }

    fn transaction(&self, update: bool) -> DbResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(
            Arc::clone(&self.shared),
            update,
        )))
    }

    fn cursor(&self, query: &str) -> DbResult<Box<dyn Query>> {
        let spec = QuerySpec::parse(query)?;
        let schema = self
            .shared
            .lock_state()
            .tables
            .get(&spec.table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| DbError::UnknownTable(spec.table.clone()))?;
        Ok(Box::new(MemoryQuery::compile(spec, schema)?))
    }

    fn libraries(&self) -> Vec<String> {
        self.shared.libraries().clone()
    }

    fn use_library(&self, library: &str) -> DbResult<bool> {
        if !self.shared.lock_state().tables.contains_key(library) {
            return Err(DbError::UnknownTable(library.to_string()));
        }
        let mut libraries = self.shared.libraries();
        if libraries.iter().any(|l| l == library) {
            return Ok(false);
        }
        libraries.push(library.to_string());
        Ok(true)
    }

    fn unuse_library(&self, library: &str) -> DbResult<bool> {
        let mut libraries = self.shared.libraries();
        let before = libraries.len();
        libraries.retain(|l| l != library);
        Ok(libraries.len() != before)
    }

    fn libget(&self, name: &str) -> DbResult<Vec<(String, Vec<u8>)>> {
        let libraries = self.libraries();
        let state = self.shared.snapshot();
        let mut sources = Vec::new();
        for library in libraries {
            let Some(table) = state.tables.get(&library) else {
                continue;
            };
            for bytes in table.rows.values() {
                let record = Record::unpack(bytes)?;
                if record.get(0) == Some(name.as_bytes()) {
                    let text = record.get(1).unwrap_or_default().to_vec();
                    sources.push((library.clone(), text));
                }
            }
        }
        Ok(sources)
    }

    fn dump(&self, table: &str) -> DbResult<i64> {
        let state = self.shared.snapshot();
        if !table.is_empty() {
            return self.dump_table(&state, table);
        }
        let mut total = 0;
        for name in state.tables.keys() {
            total += self.dump_table(&state, name)?;
        }
        Ok(total)
    }

    fn load(&self, table: &str) -> DbResult<i64> {
        let DumpFile { schema, records } = dump::read(self.dir()?, table)?;
        for record in &records {
            schema.validate(record)?;
        }

        let mut guard = self.shared.lock_state();
        if guard.tables.contains_key(table) {
            return Err(DbError::DuplicateTable(table.to_string()));
        }
        let state = Arc::make_mut(&mut guard);
        let mut loaded = Table::new(schema);
        for record in records {
            let address = self.shared.next_address();
            loaded.rows.insert(address, record);
            state.locations.insert(address, table.to_string());
        }
        let count = loaded.rows.len() as i64;
        state.tables.insert(table.to_string(), loaded);
        info!("loaded {count} records into {table}");
        Ok(count)
    }

    fn check(&self) -> DbResult<String> {
        let state = self.shared.snapshot();
        let mut problems = String::new();
        for (address, name) in &state.locations {
            match state.tables.get(name) {
                Some(table) if table.rows.contains_key(address) => {}
                _ => {
                    let _ = writeln!(problems, "record {address} missing from {name}");
                }
            }
        }
        for (name, table) in &state.tables {
            for (address, bytes) in &table.rows {
                if state.locations.get(address) != Some(name) {
                    let _ = writeln!(problems, "record {address} of {name} is not indexed");
                }
                if let Err(e) = table.schema.validate(bytes) {
                    let _ = writeln!(problems, "record {address} of {name}: {e}");
                }
            }
        }
        Ok(problems.trim_end().to_string())
    }

    fn size(&self) -> i64 {
        let state = self.shared.snapshot();
        state
            .tables
            .values()
            .flat_map(|t| t.rows.values())
            .map(|r| r.len() as i64)
            .sum()
    }

    fn timestamp(&self) -> Vec<u8> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        let mut last = self
            .shared
            .last_timestamp
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *last = now.max(*last + 1);

        let mut packed = vec![TIMESTAMP_TAG];
        packed.extend_from_slice(&last.to_be_bytes());
        packed
    }

    fn password_hash(&self, user: &str) -> Option<Vec<u8>> {
        let state = self.shared.snapshot();
        state
            .tables
            .get(USERS_TABLE)?
            .rows
            .values()
            .filter_map(|bytes| Record::unpack(bytes).ok())
            .find(|record| record.get(0) == Some(user.as_bytes()))
            .and_then(|record| record.get(1).map(<[u8]>::to_vec))
    }
}
