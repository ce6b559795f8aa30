//! Command execution.
//!
//! The [`Dispatcher`] turns one decoded [`Request`] into one [`Response`]. Every
//! failure that concerns only the request (unknown command, bad arguments, unknown
//! handle, missing authentication, database errors, even a panic inside a handler)
//! becomes a failure envelope on the same connection. Only transport failures are
//! returned to the caller, which then drops the connection.
use std::{
    any::Any,
    io::{Read, Write},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::{debug, error, info, trace, warn};
use thiserror::Error;

use crate::database::{Database, DbError, Dir, Transaction};

use super::{
    Command, ProtocolTransport, Request, Response,
    auth::{self, TOKEN_SIZE, TokenSet},
    codec::{CodecError, Reader},
    registry::Registry,
    request::{Get1Dir, QueryRef},
    response::RowData,
    session::{Session, SessionError},
    transport::TransportError,
};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    #[error("not authorized")]
    NotAuthorized,

    #[error("malformed request: {0}")]
    Malformed(CodecError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("get1: result is not unique: {0}")]
    NotUnique(String),

    #[error("internal error: {0}")]
    Panic(String),
}

/// Shared state every connection executes against.
#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<dyn Database>,
    registry: Arc<Registry>,
    tokens: Arc<TokenSet>,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn Database>, registry: Arc<Registry>, tokens: Arc<TokenSet>) -> Self {
        Self {
            db,
            registry,
            tokens,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Reads one request from `transport`, executes it and writes the response.
    pub fn handle<T: Read + Write>(
        &self,
        session: &mut Session,
        transport: &mut ProtocolTransport<T>,
    ) -> Result<(), TransportError> {
        let response = match read_request(transport) {
            Ok(request) => {
                debug!("{}: {request:?}", session.session_id());
                self.dispatch(session, request)
            }
            Err(CommandError::Malformed(e)) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!("{}: {e}", session.session_id());
                Response::Err(e.to_string())
            }
        };

        let leftover = transport.discard();
        if leftover > 0 {
            warn!(
                "{}: discarded {leftover} unread request bytes",
                session.session_id()
            );
        }

        trace!("{}: {response:?}", session.session_id());
        response.encode(transport.output());
        transport.write()
    }

    /// Checks authorization and executes `request`, converting any failure into a
    /// failure envelope.
    pub fn dispatch(&self, session: &mut Session, request: Request) -> Response {
        let command = request.command();
        if !session.authenticated() && !command.allowed_unauthenticated() {
            return Response::Err(CommandError::NotAuthorized.to_string());
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(session, request))) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("{}: {command} failed: {e}", session.session_id());
                Response::Err(e.to_string())
            }
            Err(payload) => {
                let e = CommandError::Panic(panic_message(payload));
                error!("{}: {command} panicked: {e}", session.session_id());
                Response::Err(e.to_string())
            }
        }
    }

    fn execute(&self, session: &mut Session, request: Request) -> Result<Response, CommandError> {
        Ok(match request {
            Request::Abort { tn } => {
                session.end_transaction(tn)?.abort();
                Response::Ok
            }
            Request::Admin { request } => {
                self.db.admin(&request)?;
                Response::Ok
            }
            Request::Auth { data } => Response::Bool(self.authenticate(session, &data)),
            Request::Check => Response::Str(self.db.check()?),
            Request::Close { query } => {
                session.end(query)?.query.close();
                Response::Ok
            }
            Request::Commit { tn } => {
                let mut tran = session.end_transaction(tn)?;
                match tran.complete() {
                    Ok(conflict) => Response::Str(conflict.unwrap_or_default()),
                    Err(e) => {
                        tran.abort();
                        return Err(e.into());
                    }
                }
            }
            Request::Connections => Response::Strs(self.registry.session_ids()),
            Request::Cursor { query } => {
                let query = self.db.cursor(&query)?;
                Response::Int(session.add_cursor(query).into())
            }
            Request::Cursors => Response::Int(session.cursors_count() as i64),
            Request::Dump { table } => Response::Int(self.db.dump(&table)?),
            Request::Erase { tn, address } => {
                session.get_transaction(tn)?.erase(address)?;
                Response::Ok
            }
            Request::Explain { query } => Response::Str(session.lookup(query)?.query.explain()),
            Request::Get { dir, query, tn } => get(session, dir, query, tn)?,
            Request::Get1 { dir, tn, query } => self.get1(session, dir, tn, &query)?,
            Request::Header { query } => Response::Strs(session.lookup(query)?.query.header()),
            Request::Keys { query } => Response::Keys(session.lookup(query)?.query.keys()),
            Request::Kill { session_id } => {
                Response::Int(self.registry.kill(&session_id) as i64)
            }
            Request::LibGet { name } => Response::Sources(self.db.libget(&name)?),
            Request::Libraries => Response::Strs(self.db.libraries()),
            Request::Load { table } => Response::Int(self.db.load(&table)?),
            Request::Log { text } => {
                info!("{}: {text}", session.session_id());
                Response::Ok
            }
            Request::Nonce => {
                let nonce = auth::nonce();
                session.set_nonce(nonce.clone());
                Response::Buf(nonce)
            }
            Request::Order { query } => Response::Strs(session.lookup(query)?.query.ordering()),
            Request::Output { query, tn, record } => {
                let (entry, tran) = session.bind(query, tn)?;
                entry.query.output(tran, &record)?;
                Response::Ok
            }
            Request::Query { tn, query } => {
                let query = session.get_transaction(tn)?.query(&query)?;
                Response::Int(session.add_query(tn, query).into())
            }
            Request::ReadCount { tn } => Response::Int(session.get_transaction(tn)?.read_count()),
            Request::Request { tn, action } => {
                Response::Int(session.get_transaction(tn)?.request(&action)?)
            }
            Request::Rewind { query } => {
                session.lookup(query)?.query.rewind();
                Response::Ok
            }
            Request::SessionId { session_id } => {
                if !session_id.is_empty() {
                    session.set_session_id(session_id);
                }
                Response::Str(session.session_id())
            }
            Request::Size => Response::Int(self.db.size()),
            Request::Timestamp => Response::Packed(self.db.timestamp()),
            Request::Token => Response::Buf(self.tokens.issue().to_vec()),
            Request::Transaction { update } => {
                let tran = self.db.transaction(update)?;
                Response::Int(session.add_transaction(tran).into())
            }
            Request::Transactions => Response::Ints(
                session
                    .transaction_ids()
                    .into_iter()
                    .map(i64::from)
                    .collect(),
            ),
            Request::Unuse { library } => Response::Bool(self.db.unuse_library(&library)?),
            Request::Update {
                tn,
                address,
                record,
            } => Response::Int(session.get_transaction(tn)?.update(address, &record)?),
            Request::Use { library } => Response::Bool(self.db.use_library(&library)?),
            Request::WriteCount { tn } => {
                Response::Int(session.get_transaction(tn)?.write_count())
            }
        })
    }

    /// Runs a one-off query and returns a single row. Without a transaction handle
    /// the query runs in a temporary read-only transaction.
    fn get1(
        &self,
        session: &mut Session,
        dir: Get1Dir,
        tn: Option<i32>,
        query: &str,
    ) -> Result<Response, CommandError> {
        let mut temporary: Option<Box<dyn Transaction>> = None;
        let tran: &mut dyn Transaction = match tn {
            Some(tn) => session.get_transaction(tn)?,
            None => temporary.insert(self.db.transaction(false)?).as_mut(),
        };
        let row = get1_row(tran, dir, query);
        if let Some(mut tran) = temporary {
            tran.abort();
        }
        Ok(Response::Row(row?))
    }

    fn authenticate(&self, session: &mut Session, data: &[u8]) -> bool {
        if data.len() == TOKEN_SIZE {
            if !self.tokens.redeem(data) {
                warn!("{}: token rejected", session.session_id());
                return false;
            }
            info!("{}: authenticated by token", session.session_id());
            session.set_authenticated(true);
            return true;
        }

        let Some(nonce) = session.take_nonce() else {
            warn!("{}: auth without a nonce", session.session_id());
            return false;
        };
        let Some((user, digest)) = auth::split_credentials(data) else {
            return false;
        };
        let verified = self
            .db
            .password_hash(user)
            .is_some_and(|hash| auth::verify(&nonce, &hash, digest));
        if verified {
            info!("{}: authenticated as {user}", session.session_id());
            session.set_authenticated(true);
        } else {
            warn!("{}: authentication failed for {user}", session.session_id());
        }
        verified
    }
}

fn read_request<R: Reader>(r: &mut R) -> Result<Request, CommandError> {
    let byte = r.get_byte().map_err(CommandError::Malformed)?;
    let command = Command::from_byte(byte).ok_or(CommandError::UnknownCommand(byte))?;
    Request::decode(command, r).map_err(CommandError::Malformed)
}

/// Next or previous row of a query or cursor. The header goes out with the first
/// row returned for the handle.
fn get(
    session: &mut Session,
    dir: Dir,
    query: QueryRef,
    tn: Option<i32>,
) -> Result<Response, CommandError> {
    let (entry, tran) = session.bind(query, tn)?;
    let Some(row) = entry.query.get(tran, dir)? else {
        return Ok(Response::Row(None));
    };
    let header = if entry.header_sent {
        None
    } else {
        entry.header_sent = true;
        Some(entry.query.header())
    };
    Ok(Response::Row(Some(RowData {
        address: row.address,
        header,
        record: row.record,
    })))
}

fn get1_row(
    tran: &mut dyn Transaction,
    dir: Get1Dir,
    text: &str,
) -> Result<Option<RowData>, CommandError> {
    let mut query = tran.query(text)?;
    let row = match dir {
        Get1Dir::First => query.get(tran, Dir::Next),
        Get1Dir::Last => query.get(tran, Dir::Prev),
        Get1Dir::One => match query.get(tran, Dir::Next) {
            Ok(Some(row)) => match query.get(tran, Dir::Next) {
                Ok(Some(_)) => {
                    query.close();
                    return Err(CommandError::NotUnique(text.to_string()));
                }
                Ok(None) => Ok(Some(row)),
                Err(e) => Err(e),
            },
            other => other,
        },
    };
    let header = query.header();
    query.close();

    Ok(row?.map(|row| RowData {
        address: row.address,
        header: Some(header),
        record: row.record,
    }))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
