use crate::database::Dir;

use super::{
    Command,
    codec::{CodecError, Encoder, Reader},
};

/// Row selection for GET1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Get1Dir {
    First,
    Last,
    /// Exactly one row must match.
    One,
}

/// Names an open query or cursor of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRef {
    Query(i32),
    Cursor(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Abort { tn: i32 },
    Admin { request: String },
    Auth { data: Vec<u8> },
    Check,
    Close { query: QueryRef },
    Commit { tn: i32 },
    Connections,
    Cursor { query: String },
    Cursors,
    Dump { table: String },
    Erase { tn: i32, address: i64 },
    Explain { query: QueryRef },
    Get { dir: Dir, query: QueryRef, tn: Option<i32> },
    Get1 { dir: Get1Dir, tn: Option<i32>, query: String },
    Header { query: QueryRef },
    Keys { query: QueryRef },
    Kill { session_id: String },
    LibGet { name: String },
    Libraries,
    Load { table: String },
    Log { text: String },
    Nonce,
    Order { query: QueryRef },
    Output { query: QueryRef, tn: Option<i32>, record: Vec<u8> },
    Query { tn: i32, query: String },
    ReadCount { tn: i32 },
    Request { tn: i32, action: String },
    Rewind { query: QueryRef },
    SessionId { session_id: String },
    Size,
    Timestamp,
    Token,
    Transaction { update: bool },
    Transactions,
    Unuse { library: String },
    Update { tn: i32, address: i64, record: Vec<u8> },
    Use { library: String },
    WriteCount { tn: i32 },
}

fn get_dir<R: Reader>(r: &mut R) -> Result<Dir, CodecError> {
    match r.get_int()? {
        0 => Ok(Dir::Next),
        1 => Ok(Dir::Prev),
        value => Err(CodecError::InvalidValue {
            what: "direction",
            value,
        }),
    }
}

fn put_dir(enc: &mut Encoder, dir: Dir) {
    enc.put_int(match dir {
        Dir::Next => 0,
        Dir::Prev => 1,
    });
}

fn get_get1_dir<R: Reader>(r: &mut R) -> Result<Get1Dir, CodecError> {
    match r.get_int()? {
        0 => Ok(Get1Dir::First),
        1 => Ok(Get1Dir::Last),
        2 => Ok(Get1Dir::One),
        value => Err(CodecError::InvalidValue {
            what: "get1 direction",
            value,
        }),
    }
}

fn put_get1_dir(enc: &mut Encoder, dir: Get1Dir) {
    enc.put_int(match dir {
        Get1Dir::First => 0,
        Get1Dir::Last => 1,
        Get1Dir::One => 2,
    });
}

fn get_query_ref<R: Reader>(r: &mut R) -> Result<QueryRef, CodecError> {
    let is_cursor = r.get_bool()?;
    let id = r.get_i32()?;
    Ok(if is_cursor {
        QueryRef::Cursor(id)
    } else {
        QueryRef::Query(id)
    })
}

fn put_query_ref(enc: &mut Encoder, query: QueryRef) {
    let (is_cursor, id) = match query {
        QueryRef::Query(id) => (false, id),
        QueryRef::Cursor(id) => (true, id),
    };
    enc.put_bool(is_cursor);
    enc.put_int(i64::from(id));
}

/// Optional transaction handle; any negative value means none.
fn get_tran<R: Reader>(r: &mut R) -> Result<Option<i32>, CodecError> {
    let tn = r.get_i32()?;
    Ok((tn >= 0).then_some(tn))
}

fn put_tran(enc: &mut Encoder, tn: Option<i32>) {
    enc.put_int(tn.map_or(-1, i64::from));
}

impl Request {
    /// Decodes the arguments of `command`. The command byte itself has already been
    /// consumed.
    pub fn decode<R: Reader>(command: Command, r: &mut R) -> Result<Request, CodecError> {
        Ok(match command {
            Command::Abort => Request::Abort { tn: r.get_i32()? },
            Command::Admin => Request::Admin {
                request: r.get_str()?,
            },
            Command::Auth => Request::Auth { data: r.get_buf()? },
            Command::Check => Request::Check,
            Command::Close => Request::Close {
                query: get_query_ref(r)?,
            },
            Command::Commit => Request::Commit { tn: r.get_i32()? },
            Command::Connections => Request::Connections,
            Command::Cursor => Request::Cursor {
                query: r.get_str()?,
            },
            Command::Cursors => Request::Cursors,
            Command::Dump => Request::Dump {
                table: r.get_str()?,
            },
            Command::Erase => Request::Erase {
                tn: r.get_i32()?,
                address: r.get_int()?,
            },
            Command::Explain => Request::Explain {
                query: get_query_ref(r)?,
            },
            Command::Get => Request::Get {
                dir: get_dir(r)?,
                query: get_query_ref(r)?,
                tn: get_tran(r)?,
            },
            Command::Get1 => Request::Get1 {
                dir: get_get1_dir(r)?,
                tn: get_tran(r)?,
                query: r.get_str()?,
            },
            Command::Header => Request::Header {
                query: get_query_ref(r)?,
            },
            Command::Keys => Request::Keys {
                query: get_query_ref(r)?,
            },
            Command::Kill => Request::Kill {
                session_id: r.get_str()?,
            },
            Command::LibGet => Request::LibGet { name: r.get_str()? },
            Command::Libraries => Request::Libraries,
            Command::Load => Request::Load {
                table: r.get_str()?,
            },
            Command::Log => Request::Log { text: r.get_str()? },
            Command::Nonce => Request::Nonce,
            Command::Order => Request::Order {
                query: get_query_ref(r)?,
            },
            Command::Output => Request::Output {
                query: get_query_ref(r)?,
                tn: get_tran(r)?,
                record: r.get_buf()?,
            },
            Command::Query => Request::Query {
                tn: r.get_i32()?,
                query: r.get_str()?,
            },
            Command::ReadCount => Request::ReadCount { tn: r.get_i32()? },
            Command::Request => Request::Request {
                tn: r.get_i32()?,
                action: r.get_str()?,
            },
            Command::Rewind => Request::Rewind {
                query: get_query_ref(r)?,
            },
            Command::SessionId => Request::SessionId {
                session_id: r.get_str()?,
            },
            Command::Size => Request::Size,
            Command::Timestamp => Request::Timestamp,
            Command::Token => Request::Token,
            Command::Transaction => Request::Transaction {
                update: r.get_bool()?,
            },
            Command::Transactions => Request::Transactions,
            Command::Unuse => Request::Unuse {
                library: r.get_str()?,
            },
            Command::Update => Request::Update {
                tn: r.get_i32()?,
                address: r.get_int()?,
                record: r.get_buf()?,
            },
            Command::Use => Request::Use {
                library: r.get_str()?,
            },
            Command::WriteCount => Request::WriteCount { tn: r.get_i32()? },
        })
    }

    /// Writes the command byte followed by the arguments.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_byte(self.command().to_byte());
        match self {
            Request::Check
            | Request::Connections
            | Request::Cursors
            | Request::Libraries
            | Request::Nonce
            | Request::Size
            | Request::Timestamp
            | Request::Token
            | Request::Transactions => {}
            Request::Abort { tn }
            | Request::Commit { tn }
            | Request::ReadCount { tn }
            | Request::WriteCount { tn } => enc.put_int(i64::from(*tn)),
            Request::Admin { request: s }
            | Request::Cursor { query: s }
            | Request::Dump { table: s }
            | Request::Kill { session_id: s }
            | Request::LibGet { name: s }
            | Request::Load { table: s }
            | Request::Log { text: s }
            | Request::SessionId { session_id: s }
            | Request::Unuse { library: s }
            | Request::Use { library: s } => enc.put_str(s),
            Request::Auth { data } => enc.put_buf(data),
            Request::Close { query }
            | Request::Explain { query }
            | Request::Header { query }
            | Request::Keys { query }
            | Request::Order { query }
            | Request::Rewind { query } => put_query_ref(enc, *query),
            Request::Erase { tn, address } => {
                enc.put_int(i64::from(*tn));
                enc.put_int(*address);
            }
            Request::Get { dir, query, tn } => {
                put_dir(enc, *dir);
                put_query_ref(enc, *query);
                put_tran(enc, *tn);
            }
            Request::Get1 { dir, tn, query } => {
                put_get1_dir(enc, *dir);
                put_tran(enc, *tn);
                enc.put_str(query);
            }
            Request::Output { query, tn, record } => {
                put_query_ref(enc, *query);
                put_tran(enc, *tn);
                enc.put_buf(record);
            }
            Request::Query { tn, query: s } | Request::Request { tn, action: s } => {
                enc.put_int(i64::from(*tn));
                enc.put_str(s);
            }
            Request::Transaction { update } => enc.put_bool(*update),
            Request::Update {
                tn,
                address,
                record,
            } => {
                enc.put_int(i64::from(*tn));
                enc.put_int(*address);
                enc.put_buf(record);
            }
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Request::Abort { .. } => Command::Abort,
            Request::Admin { .. } => Command::Admin,
            Request::Auth { .. } => Command::Auth,
            Request::Check => Command::Check,
            Request::Close { .. } => Command::Close,
            Request::Commit { .. } => Command::Commit,
            Request::Connections => Command::Connections,
            Request::Cursor { .. } => Command::Cursor,
            Request::Cursors => Command::Cursors,
            Request::Dump { .. } => Command::Dump,
            Request::Erase { .. } => Command::Erase,
            Request::Explain { .. } => Command::Explain,
            Request::Get { .. } => Command::Get,
            Request::Get1 { .. } => Command::Get1,
            Request::Header { .. } => Command::Header,
            Request::Keys { .. } => Command::Keys,
            Request::Kill { .. } => Command::Kill,
            Request::LibGet { .. } => Command::LibGet,
            Request::Libraries => Command::Libraries,
            Request::Load { .. } => Command::Load,
            Request::Log { .. } => Command::Log,
            Request::Nonce => Command::Nonce,
            Request::Order { .. } => Command::Order,
            Request::Output { .. } => Command::Output,
            Request::Query { .. } => Command::Query,
            Request::ReadCount { .. } => Command::ReadCount,
            Request::Request { .. } => Command::Request,
            Request::Rewind { .. } => Command::Rewind,
            Request::SessionId { .. } => Command::SessionId,
            Request::Size => Command::Size,
            Request::Timestamp => Command::Timestamp,
            Request::Token => Command::Token,
            Request::Transaction { .. } => Command::Transaction,
            Request::Transactions => Command::Transactions,
            Request::Unuse { .. } => Command::Unuse,
            Request::Update { .. } => Command::Update,
            Request::Use { .. } => Command::Use,
            Request::WriteCount { .. } => Command::WriteCount,
        }
    }
}
