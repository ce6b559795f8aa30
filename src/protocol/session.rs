//! Per-connection state.
//!
//! A [`Session`] is created when a connection is accepted and dropped when it closes.
//! It owns every transaction, query and cursor the client opened, each reachable
//! through a small integer handle. Only the worker currently serving the connection
//! touches a session, so none of this is synchronized; the part other connections
//! may observe lives in the shared [`ConnectionInfo`].
use std::{collections::BTreeMap, fmt, sync::Arc};

use log::debug;
use thiserror::Error;

use crate::database::{Query, Transaction};

use super::{registry::ConnectionInfo, request::QueryRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Transaction,
    Query,
    Cursor,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleKind::Transaction => "transaction",
            HandleKind::Query => "query",
            HandleKind::Cursor => "cursor",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{kind} {id} not found")]
    HandleNotFound { kind: HandleKind, id: i32 },

    #[error("cursor {0} requires a transaction")]
    CursorWithoutTransaction(i32),
}

/// Maps handles to live resources. Handles increase monotonically and are never
/// reused for the life of the table.
pub struct HandleTable<T> {
    kind: HandleKind,
    entries: BTreeMap<i32, T>,
    next: i32,
}

impl<T> HandleTable<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            next: 0,
        }
    }

    pub fn add(&mut self, item: T) -> i32 {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, item);
        id
    }

    pub fn get(&self, id: i32) -> Result<&T, SessionError> {
        self.entries.get(&id).ok_or(SessionError::HandleNotFound {
            kind: self.kind,
            id,
        })
    }

    pub fn get_mut(&mut self, id: i32) -> Result<&mut T, SessionError> {
        let kind = self.kind;
        self.entries
            .get_mut(&id)
            .ok_or(SessionError::HandleNotFound { kind, id })
    }

    pub fn remove(&mut self, id: i32) -> Result<T, SessionError> {
        self.entries
            .remove(&id)
            .ok_or(SessionError::HandleNotFound {
                kind: self.kind,
                id,
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.entries.keys().copied().collect()
    }

    fn drain(&mut self) -> impl Iterator<Item = (i32, T)> + use<T> {
        std::mem::take(&mut self.entries).into_iter()
    }
}

/// An open query or cursor.
pub struct QueryEntry {
    /// Transaction a query was created under. Always `None` for cursors, which are
    /// given a transaction on each call instead.
    pub tran: Option<i32>,
    pub query: Box<dyn Query>,
    pub header_sent: bool,
}

impl QueryEntry {
    fn new(tran: Option<i32>, query: Box<dyn Query>) -> Self {
        Self {
            tran,
            query,
            header_sent: false,
        }
    }
}

pub struct Session {
    info: Arc<ConnectionInfo>,
    authenticated: bool,
    text_mode: bool,
    nonce: Option<Vec<u8>>,
    transactions: HandleTable<Box<dyn Transaction>>,
    queries: HandleTable<QueryEntry>,
    cursors: HandleTable<QueryEntry>,
}

impl Session {
    pub fn new(info: Arc<ConnectionInfo>) -> Self {
        Self {
            info,
            authenticated: false,
            text_mode: false,
            nonce: None,
            transactions: HandleTable::new(HandleKind::Transaction),
            queries: HandleTable::new(HandleKind::Query),
            cursors: HandleTable::new(HandleKind::Cursor),
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn session_id(&self) -> String {
        self.info.session_id()
    }

    pub fn set_session_id(&mut self, session_id: String) {
        self.info.set_session_id(session_id);
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn text_mode(&self) -> bool {
        self.text_mode
    }

    pub fn set_text_mode(&mut self, text_mode: bool) {
        self.text_mode = text_mode;
    }

    /// Replaces any pending nonce.
    pub fn set_nonce(&mut self, nonce: Vec<u8>) {
        self.nonce = Some(nonce);
    }

    pub fn nonce(&self) -> Option<&[u8]> {
        self.nonce.as_deref()
    }

    /// Removes the pending nonce; a nonce is good for one AUTH attempt.
    pub fn take_nonce(&mut self) -> Option<Vec<u8>> {
        self.nonce.take()
    }

    pub fn add_transaction(&mut self, tran: Box<dyn Transaction>) -> i32 {
        self.transactions.add(tran)
    }

    pub fn get_transaction(&mut self, tn: i32) -> Result<&mut dyn Transaction, SessionError> {
        Ok(self.transactions.get_mut(tn)?.as_mut())
    }

    /// Removes the transaction from the session. The caller completes or aborts it.
    pub fn end_transaction(&mut self, tn: i32) -> Result<Box<dyn Transaction>, SessionError> {
        self.transactions.remove(tn)
    }

    pub fn transaction_ids(&self) -> Vec<i32> {
        self.transactions.ids()
    }

    pub fn add_query(&mut self, tn: i32, query: Box<dyn Query>) -> i32 {
        self.queries.add(QueryEntry::new(Some(tn), query))
    }

    pub fn get_query(&mut self, qn: i32) -> Result<&mut QueryEntry, SessionError> {
        self.queries.get_mut(qn)
    }

    pub fn end_query(&mut self, qn: i32) -> Result<QueryEntry, SessionError> {
        self.queries.remove(qn)
    }

    pub fn add_cursor(&mut self, query: Box<dyn Query>) -> i32 {
        self.cursors.add(QueryEntry::new(None, query))
    }

    pub fn get_cursor(&mut self, cn: i32) -> Result<&mut QueryEntry, SessionError> {
        self.cursors.get_mut(cn)
    }

    pub fn end_cursor(&mut self, cn: i32) -> Result<QueryEntry, SessionError> {
        self.cursors.remove(cn)
    }

    pub fn cursors_count(&self) -> usize {
        self.cursors.len()
    }

    /// Looks up either kind of query.
    pub fn lookup(&mut self, query: QueryRef) -> Result<&mut QueryEntry, SessionError> {
        match query {
            QueryRef::Query(qn) => self.get_query(qn),
            QueryRef::Cursor(cn) => self.get_cursor(cn),
        }
    }

    pub fn end(&mut self, query: QueryRef) -> Result<QueryEntry, SessionError> {
        match query {
            QueryRef::Query(qn) => self.end_query(qn),
            QueryRef::Cursor(cn) => self.end_cursor(cn),
        }
    }

    /// Pairs a query with the transaction it runs under for one operation: the
    /// query's own transaction, or for a cursor the transaction `tn` supplied with
    /// the request. Nothing is remembered for the next call.
    pub fn bind(
        &mut self,
        query: QueryRef,
        tn: Option<i32>,
    ) -> Result<(&mut QueryEntry, &mut dyn Transaction), SessionError> {
        let (entry, tn) = match query {
            QueryRef::Query(qn) => {
                let entry = self.queries.get_mut(qn)?;
                let tn = entry.tran.ok_or(SessionError::HandleNotFound {
                    kind: HandleKind::Transaction,
                    id: -1,
                })?;
                (entry, tn)
            }
            QueryRef::Cursor(cn) => {
                let tn = tn.ok_or(SessionError::CursorWithoutTransaction(cn))?;
                (self.cursors.get_mut(cn)?, tn)
            }
        };
        let tran = self.transactions.get_mut(tn)?;
        Ok((entry, tran.as_mut()))
    }

    /// Closes every query and cursor and aborts every unfinished transaction.
    pub fn release(&mut self) {
        let queries = self.queries.len() + self.cursors.len();
        let transactions = self.transactions.len();
        for (_, mut entry) in self.queries.drain().chain(self.cursors.drain()) {
            entry.query.close();
        }
        for (_, mut tran) in self.transactions.drain() {
            if !tran.is_ended() {
                tran.abort();
            }
        }
        if queries + transactions > 0 {
            debug!(
                "session {} released {transactions} transactions and {queries} queries",
                self.session_id()
            );
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        database::Database,
        protocol::registry::Registry,
        storage::{MemoryDatabase, record::Record},
    };

    use super::*;

    fn session() -> Session {
        let registry = Registry::new();
        Session::new(registry.register("peer".into(), None))
    }

    fn database() -> MemoryDatabase {
        let db = MemoryDatabase::default();
        db.admin("create items (name) key(name)").unwrap();
        db
    }

    #[test]
    fn handle_table_lifecycle() {
        let mut table = HandleTable::new(HandleKind::Query);
        let a = table.add("a");
        let b = table.add("b");

        assert_eq!(table.get(a), Ok(&"a"));
        assert_eq!(table.remove(a), Ok("a"));
        assert_eq!(
            table.get(a),
            Err(SessionError::HandleNotFound {
                kind: HandleKind::Query,
                id: a
            })
        );
        let c = table.add("c");
        assert!(c > b);
        assert_eq!(table.ids(), vec![b, c]);
    }

    #[test]
    fn ids_never_reused() {
        let mut table = HandleTable::new(HandleKind::Cursor);
        let mut seen = Vec::new();
        for round in 0..5 {
            let ids: Vec<i32> = (0..4).map(|_| table.add(round)).collect();
            for id in ids.iter().rev() {
                table.remove(*id).unwrap();
            }
            seen.extend(ids);
        }
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), seen.len());
        assert!(table.is_empty());
    }

    #[test]
    fn transaction_lifecycle() {
        let db = database();
        let mut session = session();
        let tn = session.add_transaction(db.transaction(true).unwrap());

        assert!(session.get_transaction(tn).unwrap().is_update());
        let mut tran = session.end_transaction(tn).unwrap();
        tran.abort();
        assert!(session.get_transaction(tn).is_err());
        assert!(session.end_transaction(tn).is_err());
    }

    #[test]
    fn cursor_needs_transaction_per_call() {
        let db = database();
        let mut session = session();
        let tn = session.add_transaction(db.transaction(false).unwrap());
        let cn = session.add_cursor(db.cursor("items").unwrap());

        assert!(session.bind(QueryRef::Cursor(cn), Some(tn)).is_ok());
        assert_eq!(
            session.bind(QueryRef::Cursor(cn), None).err(),
            Some(SessionError::CursorWithoutTransaction(cn))
        );
        assert_eq!(session.cursors_count(), 1);
    }

    #[test]
    fn query_is_bound_to_its_transaction() {
        let db = database();
        let mut session = session();
        let tn = session.add_transaction(db.transaction(true).unwrap());
        let query = session.get_transaction(tn).unwrap().query("items").unwrap();
        let qn = session.add_query(tn, query);

        let (entry, tran) = session.bind(QueryRef::Query(qn), None).unwrap();
        tran.output("items", &Record::from(vec!["x"]).pack().unwrap())
            .unwrap();
        assert!(entry.query.get(tran, crate::database::Dir::Next).unwrap().is_some());

        session.end_transaction(tn).unwrap().abort();
        assert_eq!(
            session.bind(QueryRef::Query(qn), None).err(),
            Some(SessionError::HandleNotFound {
                kind: HandleKind::Transaction,
                id: tn
            })
        );
    }

    #[test]
    fn release_aborts_open_transactions() {
        let db = database();
        let mut session = session();
        let tn = session.add_transaction(db.transaction(true).unwrap());
        session
            .get_transaction(tn)
            .unwrap()
            .output("items", &Record::from(vec!["pending"]).pack().unwrap())
            .unwrap();
        drop(session);

        let mut tran = db.transaction(false).unwrap();
        assert!(tran.visible_rows("items").unwrap().is_empty());
    }

    #[test]
    fn nonce_is_single_use() {
        let mut session = session();
        session.set_nonce(vec![1; 8]);
        session.set_nonce(vec![2; 8]);
        assert_eq!(session.nonce(), Some(&[2_u8; 8][..]));
        assert_eq!(session.take_nonce(), Some(vec![2; 8]));
        assert_eq!(session.take_nonce(), None);
    }
}
