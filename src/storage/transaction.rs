use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use log::debug;

use crate::database::{DbError, DbResult, Query, Row, Transaction};

use super::{
    Shared, State,
    query::{MemoryQuery, QuerySpec, Tokens},
    record::Record,
    table::{Schema, display_key},
};

/// A row removed by the transaction, kept so a failed update can put it back.
enum Removed {
    Pending(String, Vec<u8>),
    Committed,
}

/// Works on the committed state as of its start plus its own pending writes.
/// Nothing becomes visible to others until [`Transaction::complete`].
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    snapshot: Arc<State>,
    update: bool,
    ended: bool,
    added: BTreeMap<i64, (String, Vec<u8>)>,
    removed: BTreeSet<i64>,
    reads: i64,
    writes: i64,
}

impl MemoryTransaction {
    pub(crate) fn new(shared: Arc<Shared>, update: bool) -> Self {
        let snapshot = shared.snapshot();
        Self {
            shared,
            snapshot,
            update,
            ended: false,
            added: BTreeMap::new(),
            removed: BTreeSet::new(),
            reads: 0,
            writes: 0,
        }
    }

    fn check_writable(&self, action: &'static str) -> DbResult<()> {
        if self.ended {
            return Err(DbError::Ended);
        }
        if !self.update {
            return Err(DbError::ReadOnly(action));
        }
        Ok(())
    }

    fn schema(&self, table: &str) -> DbResult<&Schema> {
        self.snapshot
            .tables
            .get(table)
            .map(|t| &t.schema)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))
    }

    fn rows(&self, table: &str) -> DbResult<Vec<Row>> {
        let committed = self
            .snapshot
            .tables
            .get(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
        let mut rows: Vec<Row> = committed
            .rows
            .iter()
            .filter(|(address, _)| !self.removed.contains(*address))
            .chain(
                self.added
                    .iter()
                    .filter(|(_, (t, _))| t == table)
                    .map(|(address, (_, record))| (address, record)),
            )
            .map(|(address, record)| Row {
                address: *address,
                record: record.clone(),
            })
            .collect();
        rows.sort_by_key(|row| row.address);
        Ok(rows)
    }

    fn locate(&self, address: i64) -> DbResult<String> {
        if let Some((table, _)) = self.added.get(&address) {
            return Ok(table.clone());
        }
        match self.snapshot.locations.get(&address) {
            Some(table) if !self.removed.contains(&address) => Ok(table.clone()),
            _ => Err(DbError::RecordNotFound(address)),
        }
    }

    fn remove(&mut self, address: i64) -> Removed {
        match self.added.remove(&address) {
            Some((table, record)) => Removed::Pending(table, record),
            None => {
                self.removed.insert(address);
                Removed::Committed
            }
        }
    }

    fn restore(&mut self, address: i64, removed: Removed) {
        match removed {
            Removed::Pending(table, record) => {
                self.added.insert(address, (table, record));
            }
            Removed::Committed => {
                self.removed.remove(&address);
            }
        }
    }

    /// Reasons the pending writes cannot be applied to `state`.
    fn conflict(&self, state: &State) -> Option<String> {
        for address in &self.removed {
            if !state.locations.contains_key(address) {
                return Some(format!(
                    "record {address} was changed by another transaction"
                ));
            }
        }
        for (table, record) in self.added.values() {
            let Some(committed) = state.tables.get(table) else {
                return Some(format!("table {table} no longer exists"));
            };
            let schema = &committed.schema;
            let Some(key) = Record::unpack(record).ok().and_then(|r| schema.key_of(&r)) else {
                continue;
            };
            let duplicate = committed
                .rows
                .iter()
                .filter(|(address, _)| !self.removed.contains(*address))
                .filter_map(|(_, other)| Record::unpack(other).ok())
                .any(|other| schema.key_of(&other).as_ref() == Some(&key));
            if duplicate {
                return Some(format!(
                    "duplicate key {} in {table}",
                    display_key(&key)
                ));
            }
        }
        None
    }
}

impl Transaction for MemoryTransaction {
    fn is_update(&self) -> bool {
        self.update
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn query(&mut self, query: &str) -> DbResult<Box<dyn Query>> {
        let spec = QuerySpec::parse(query)?;
        let schema = self.schema(&spec.table)?.clone();
        Ok(Box::new(MemoryQuery::compile(spec, schema)?))
    }

    fn visible_rows(&mut self, table: &str) -> DbResult<Vec<Row>> {
        if self.ended {
            return Err(DbError::Ended);
        }
        let rows = self.rows(table)?;
        self.reads += rows.len() as i64;
        Ok(rows)
    }

    fn output(&mut self, table: &str, record: &[u8]) -> DbResult<i64> {
        self.check_writable("output")?;
        let schema = self.schema(table)?;
        let key = schema.key_of(&schema.validate(record)?);
        if let Some(key) = key {
            for row in self.rows(table)? {
                let other = Record::unpack(&row.record)?;
                if schema.key_of(&other).as_ref() == Some(&key) {
                    return Err(DbError::DuplicateKey {
                        table: table.to_string(),
                        key: display_key(&key),
                    });
                }
            }
        }

        let address = self.shared.next_address();
        self.added
            .insert(address, (table.to_string(), record.to_vec()));
        self.writes += 1;
        Ok(address)
    }

    fn update(&mut self, address: i64, record: &[u8]) -> DbResult<i64> {
        self.check_writable("update")?;
        let table = self.locate(address)?;
        let removed = self.remove(address);
        match self.output(&table, record) {
            Ok(address) => Ok(address),
            Err(e) => {
                self.restore(address, removed);
                Err(e)
            }
        }
    }

    fn erase(&mut self, address: i64) -> DbResult<()> {
        self.check_writable("erase")?;
        self.locate(address)?;
        self.remove(address);
        self.writes += 1;
        Ok(())
    }

    fn request(&mut self, action: &str) -> DbResult<i64> {
        let mut tokens = Tokens::new(action)?;
        match tokens.ident()?.as_str() {
            "delete" => {}
            other => return Err(DbError::Syntax(format!("unknown action: {other}"))),
        }
        self.check_writable("delete")?;
        let spec = QuerySpec::parse_tokens(&mut tokens)?;
        tokens.finish()?;

        let schema = self.schema(&spec.table)?.clone();
        let query = MemoryQuery::compile(spec, schema)?;
        let rows = query.matching(self)?;
        for (_, row) in &rows {
            self.erase(row.address)?;
        }
        Ok(rows.len() as i64)
    }

    fn complete(&mut self) -> DbResult<Option<String>> {
        if self.ended {
            return Err(DbError::Ended);
        }
        self.ended = true;
        if self.added.is_empty() && self.removed.is_empty() {
            return Ok(None);
        }

        let mut guard = self.shared.lock_state();
        if let Some(conflict) = self.conflict(&guard) {
            debug!("commit rejected: {conflict}");
            self.added.clear();
            self.removed.clear();
            return Ok(Some(conflict));
        }

        let state = Arc::make_mut(&mut guard);
        for address in &self.removed {
            if let Some(table) = state.locations.remove(address) {
                if let Some(table) = state.tables.get_mut(&table) {
                    table.rows.remove(address);
                }
            }
        }
        for (address, (table, record)) in std::mem::take(&mut self.added) {
            if let Some(committed) = state.tables.get_mut(&table) {
                committed.rows.insert(address, record);
                state.locations.insert(address, table);
            }
        }
        self.removed.clear();
        Ok(None)
    }

    fn abort(&mut self) {
        self.ended = true;
        self.added.clear();
        self.removed.clear();
    }

    fn read_count(&self) -> i64 {
        self.reads
    }

    fn write_count(&self) -> i64 {
        self.writes
    }
}
