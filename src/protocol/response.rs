use std::fmt;

use super::{
    Command,
    codec::{CodecError, Encoder, Reader},
};

/// A row as sent to the client. The header only travels with the first row returned
/// for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowData {
    pub address: i64,
    pub header: Option<Vec<String>>,
    pub record: Vec<u8>,
}

impl RowData {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_int(self.address);
        match &self.header {
            Some(header) => {
                enc.put_bool(true);
                enc.put_strs(header);
            }
            None => enc.put_bool(false),
        }
        enc.put_buf(&self.record);
    }

    fn decode<R: Reader>(r: &mut R) -> Result<Option<RowData>, CodecError> {
        if !r.get_bool()? {
            return Ok(None);
        }
        let address = r.get_int()?;
        let header = if r.get_bool()? {
            Some(r.get_strs()?)
        } else {
            None
        };
        let record = r.get_buf()?;
        Ok(Some(RowData {
            address,
            header,
            record,
        }))
    }
}

/// Payload of a response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Bool(bool),
    Int(i64),
    Str(String),
    Strs(Vec<String>),
    Ints(Vec<i64>),
    Buf(Vec<u8>),
    Packed(Vec<u8>),
    Keys(Vec<Vec<String>>),
    Row(Option<RowData>),
    Sources(Vec<(String, Vec<u8>)>),
    Err(String),
}

impl Response {
    /// Writes the envelope: a success flag, then the payload or the error text.
    pub fn encode(&self, enc: &mut Encoder) {
        if let Response::Err(message) = self {
            enc.put_bool(false);
            enc.put_str(message);
            return;
        }

        enc.put_bool(true);
        match self {
            Response::Ok | Response::Err(_) => {}
            Response::Bool(b) => enc.put_bool(*b),
            Response::Int(n) => enc.put_int(*n),
            Response::Str(s) => enc.put_str(s),
            Response::Strs(list) => enc.put_strs(list),
            Response::Ints(list) => enc.put_ints(list),
            Response::Buf(buf) => enc.put_buf(buf),
            Response::Packed(packed) => enc.put_packed(packed),
            Response::Keys(keys) => enc.put_str_lists(keys),
            Response::Row(None) => enc.put_bool(false),
            Response::Row(Some(row)) => {
                enc.put_bool(true);
                row.encode(enc);
            }
            Response::Sources(sources) => {
                enc.put_int(sources.len() as i64);
                for (library, packed) in sources {
                    enc.put_str(library);
                    enc.put_packed(packed);
                }
            }
        }
    }

    /// Reads the envelope of a response to `command`.
    pub fn decode<R: Reader>(command: Command, r: &mut R) -> Result<Response, CodecError> {
        if !r.get_bool()? {
            return Ok(Response::Err(r.get_str()?));
        }

        Ok(match command {
            Command::Abort
            | Command::Admin
            | Command::Close
            | Command::Erase
            | Command::Log
            | Command::Output
            | Command::Rewind => Response::Ok,
            Command::Auth | Command::Unuse | Command::Use => Response::Bool(r.get_bool()?),
            Command::Cursor
            | Command::Cursors
            | Command::Dump
            | Command::Kill
            | Command::Load
            | Command::Query
            | Command::ReadCount
            | Command::Request
            | Command::Size
            | Command::Transaction
            | Command::Update
            | Command::WriteCount => Response::Int(r.get_int()?),
            Command::Check | Command::Commit | Command::Explain | Command::SessionId => {
                Response::Str(r.get_str()?)
            }
            Command::Connections | Command::Header | Command::Libraries | Command::Order => {
                Response::Strs(r.get_strs()?)
            }
            Command::Transactions => Response::Ints(r.get_ints()?),
            Command::Nonce | Command::Token => Response::Buf(r.get_buf()?),
            Command::Timestamp => Response::Packed(r.get_packed()?),
            Command::Keys => Response::Keys(r.get_str_lists()?),
            Command::Get | Command::Get1 => Response::Row(RowData::decode(r)?),
            Command::LibGet => {
                let n = r.get_len()?;
                let mut sources = Vec::with_capacity(n.min(64));
                for _ in 0..n {
                    let library = r.get_str()?;
                    sources.push((library, r.get_packed()?));
                }
                Response::Sources(sources)
            }
        })
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => write!(f, "ok"),
            Response::Bool(b) => write!(f, "{b}"),
            Response::Int(n) => write!(f, "{n}"),
            Response::Str(s) => write!(f, "{s:?}"),
            Response::Strs(list) => write!(f, "{list:?}"),
            Response::Ints(list) => write!(f, "{list:?}"),
            Response::Buf(buf) | Response::Packed(buf) => {
                for b in buf {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Response::Keys(keys) => write!(f, "{keys:?}"),
            Response::Row(None) => write!(f, "eof"),
            Response::Row(Some(row)) => {
                if let Some(header) = &row.header {
                    writeln!(f, "{header:?}")?;
                }
                write!(f, "@{} {} bytes", row.address, row.record.len())
            }
            Response::Sources(sources) => {
                for (library, packed) in sources {
                    writeln!(f, "{library}: {} bytes", packed.len())?;
                }
                Ok(())
            }
            Response::Err(message) => write!(f, "error: {message}"),
        }
    }
}
