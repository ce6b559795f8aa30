//! Blocking client for the binary protocol.
//!
//! ```no_run
//! use rime::client::Client;
//!
//! let mut client = Client::connect("127.0.0.1:3147")?;
//! assert!(client.auth_password("admin", "secret")?);
//! let tn = client.transaction(false)?;
//! let qn = client.query(tn, "items")?;
//! # Ok::<(), rime::client::ClientError>(())
//! ```
use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
};

use thiserror::Error;

use crate::{
    database::Dir,
    protocol::{
        BANNER_PREFIX, BANNER_SIZE, Command, ProtocolTransport, Request, Response,
        auth,
        codec::{CodecError, Reader},
        request::{Get1Dir, QueryRef},
        response::RowData,
        transport::TransportError,
    },
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed response: {0}")]
    Codec(#[from] CodecError),

    #[error("client io error: {0}")]
    Io(#[from] io::Error),

    #[error("not a rime server: {0:?}")]
    Banner(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected response to {command}: {response}")]
    Unexpected { command: Command, response: Response },
}

pub struct Client<S: Read + Write = TcpStream> {
    transport: ProtocolTransport<S>,
    banner: String,
}

impl Client<TcpStream> {
    pub fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        Self::handshake(stream)
    }
}

impl<S: Read + Write> Client<S> {
    /// Reads and checks the server banner.
    pub fn handshake(stream: S) -> Result<Self, ClientError> {
        let mut transport = ProtocolTransport::new(stream);
        let raw = transport.take(BANNER_SIZE)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let banner = String::from_utf8_lossy(&raw[..end]).trim_end().to_string();
        if !banner.starts_with(BANNER_PREFIX) {
            return Err(ClientError::Banner(banner));
        }
        Ok(Self { transport, banner })
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }

    pub fn get_ref(&self) -> &S {
        self.transport.get_ref()
    }

    /// Sends one request and reads its response, failure envelopes included.
    pub fn execute(&mut self, request: &Request) -> Result<Response, ClientError> {
        request.encode(self.transport.output());
        self.transport.write()?;
        self.read_response(request.command())
    }

    /// Sends bytes as they are, for talking to the server outside the typed API.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.transport.output().put_raw(bytes);
        self.transport.write()?;
        Ok(())
    }

    pub fn read_response(&mut self, command: Command) -> Result<Response, ClientError> {
        Ok(Response::decode(command, &mut self.transport)?)
    }

    /// Like [`Client::execute`] but turns a failure envelope into an error.
    pub fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        match self.execute(request)? {
            Response::Err(message) => Err(ClientError::Server(message)),
            response => Ok(response),
        }
    }

    fn ok(&mut self, request: Request) -> Result<(), ClientError> {
        match self.call(&request)? {
            Response::Ok => Ok(()),
            response => Err(unexpected(&request, response)),
        }
    }

    fn int(&mut self, request: Request) -> Result<i64, ClientError> {
        match self.call(&request)? {
            Response::Int(n) => Ok(n),
            response => Err(unexpected(&request, response)),
        }
    }

    fn handle(&mut self, request: Request) -> Result<i32, ClientError> {
        let n = self.int(request)?;
        i32::try_from(n).map_err(|_| ClientError::Server(format!("invalid handle {n}")))
    }

    fn bool(&mut self, request: Request) -> Result<bool, ClientError> {
        match self.call(&request)? {
            Response::Bool(b) => Ok(b),
            response => Err(unexpected(&request, response)),
        }
    }

    fn str(&mut self, request: Request) -> Result<String, ClientError> {
        match self.call(&request)? {
            Response::Str(s) => Ok(s),
            response => Err(unexpected(&request, response)),
        }
    }

    fn strs(&mut self, request: Request) -> Result<Vec<String>, ClientError> {
        match self.call(&request)? {
            Response::Strs(list) => Ok(list),
            response => Err(unexpected(&request, response)),
        }
    }

    fn buf(&mut self, request: Request) -> Result<Vec<u8>, ClientError> {
        match self.call(&request)? {
            Response::Buf(buf) => Ok(buf),
            response => Err(unexpected(&request, response)),
        }
    }

    fn row(&mut self, request: Request) -> Result<Option<RowData>, ClientError> {
        match self.call(&request)? {
            Response::Row(row) => Ok(row),
            response => Err(unexpected(&request, response)),
        }
    }

    /// Sets the session id unless `session_id` is empty; returns the current one.
    pub fn session_id(&mut self, session_id: &str) -> Result<String, ClientError> {
        self.str(Request::SessionId {
            session_id: session_id.to_string(),
        })
    }

    pub fn nonce(&mut self) -> Result<Vec<u8>, ClientError> {
        self.buf(Request::Nonce)
    }

    pub fn token(&mut self) -> Result<Vec<u8>, ClientError> {
        self.buf(Request::Token)
    }

    pub fn auth(&mut self, data: &[u8]) -> Result<bool, ClientError> {
        self.bool(Request::Auth {
            data: data.to_vec(),
        })
    }

    /// Challenge-response login: fetches a nonce and answers it.
    pub fn auth_password(&mut self, user: &str, password: &str) -> Result<bool, ClientError> {
        let nonce = self.nonce()?;
        let mut data = user.as_bytes().to_vec();
        data.push(0);
        data.extend_from_slice(&auth::digest(&nonce, &auth::password_hash(user, password)));
        self.auth(&data)
    }

    pub fn admin(&mut self, request: &str) -> Result<(), ClientError> {
        self.ok(Request::Admin {
            request: request.to_string(),
        })
    }

    pub fn transaction(&mut self, update: bool) -> Result<i32, ClientError> {
        self.handle(Request::Transaction { update })
    }

    /// Commits; `Some(conflict)` when the server rejected the commit.
    pub fn commit(&mut self, tn: i32) -> Result<Option<String>, ClientError> {
        let conflict = self.str(Request::Commit { tn })?;
        Ok((!conflict.is_empty()).then_some(conflict))
    }

    pub fn abort(&mut self, tn: i32) -> Result<(), ClientError> {
        self.ok(Request::Abort { tn })
    }

    pub fn query(&mut self, tn: i32, query: &str) -> Result<i32, ClientError> {
        self.handle(Request::Query {
            tn,
            query: query.to_string(),
        })
    }

    pub fn cursor(&mut self, query: &str) -> Result<i32, ClientError> {
        self.handle(Request::Cursor {
            query: query.to_string(),
        })
    }

    pub fn get(
        &mut self,
        dir: Dir,
        query: QueryRef,
        tn: Option<i32>,
    ) -> Result<Option<RowData>, ClientError> {
        self.row(Request::Get { dir, query, tn })
    }

    pub fn get1(
        &mut self,
        dir: Get1Dir,
        tn: Option<i32>,
        query: &str,
    ) -> Result<Option<RowData>, ClientError> {
        self.row(Request::Get1 {
            dir,
            tn,
            query: query.to_string(),
        })
    }

    pub fn output(
        &mut self,
        query: QueryRef,
        tn: Option<i32>,
        record: &[u8],
    ) -> Result<(), ClientError> {
        self.ok(Request::Output {
            query,
            tn,
            record: record.to_vec(),
        })
    }

    pub fn update(&mut self, tn: i32, address: i64, record: &[u8]) -> Result<i64, ClientError> {
        self.int(Request::Update {
            tn,
            address,
            record: record.to_vec(),
        })
    }

    pub fn erase(&mut self, tn: i32, address: i64) -> Result<(), ClientError> {
        self.ok(Request::Erase { tn, address })
    }

    pub fn close(&mut self, query: QueryRef) -> Result<(), ClientError> {
        self.ok(Request::Close { query })
    }

    pub fn connections(&mut self) -> Result<Vec<String>, ClientError> {
        self.strs(Request::Connections)
    }

    pub fn kill(&mut self, session_id: &str) -> Result<i64, ClientError> {
        self.int(Request::Kill {
            session_id: session_id.to_string(),
        })
    }

    pub fn libraries(&mut self) -> Result<Vec<String>, ClientError> {
        self.strs(Request::Libraries)
    }
}

fn unexpected(request: &Request, response: Response) -> ClientError {
    ClientError::Unexpected {
        command: request.command(),
        response,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::protocol::{banner, codec::Encoder};

    use super::*;

    /// Canned server bytes in, client requests out.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client(responses: &[Response]) -> Client<Scripted> {
        let mut enc = Encoder::new();
        enc.put_raw(&banner());
        for response in responses {
            response.encode(&mut enc);
        }
        Client::handshake(Scripted {
            input: Cursor::new(enc.into_inner()),
            sent: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn reads_banner() {
        let client = client(&[]);
        assert_eq!(client.banner(), "Rime Server (v1)");
    }

    #[test]
    fn rejects_foreign_banner() {
        let result = Client::handshake(Scripted {
            input: Cursor::new(vec![b'x'; BANNER_SIZE]),
            sent: Vec::new(),
        });
        assert!(matches!(result, Err(ClientError::Banner(_))));
    }

    #[test]
    fn typed_calls() {
        let mut client = client(&[
            Response::Int(3),
            Response::Str(String::new()),
            Response::Str("record 4 was changed".into()),
            Response::Err("transaction 9 not found".into()),
        ]);

        assert_eq!(client.transaction(true).unwrap(), 3);
        assert_eq!(client.commit(3).unwrap(), None);
        assert_eq!(
            client.commit(3).unwrap(),
            Some("record 4 was changed".to_string())
        );
        assert!(matches!(
            client.abort(9),
            Err(ClientError::Server(message)) if message.contains("not found")
        ));

        let sent = &client.get_ref().sent;
        assert_eq!(sent[0], Command::Transaction.to_byte());
        assert_eq!(sent[1], 1);
    }

    #[test]
    fn auth_password_answers_the_nonce() {
        let nonce = vec![7; auth::NONCE_SIZE];
        let mut client = client(&[Response::Buf(nonce.clone()), Response::Bool(true)]);

        assert!(client.auth_password("admin", "secret").unwrap());

        let mut expected = Encoder::new();
        Request::Nonce.encode(&mut expected);
        let mut data = b"admin\0".to_vec();
        data.extend_from_slice(&auth::digest(
            &nonce,
            &auth::password_hash("admin", "secret"),
        ));
        Request::Auth { data }.encode(&mut expected);
        assert_eq!(client.get_ref().sent, expected.into_inner());
    }

    #[test]
    fn wrong_shape_is_unexpected() {
        let mut client = client(&[Response::Ok]);
        assert!(matches!(
            client.transaction(false),
            Err(ClientError::Codec(_) | ClientError::Unexpected { .. })
        ));
    }
}
