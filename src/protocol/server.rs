use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{config::ServerConfig, database::Database};

use super::{
    Dispatcher, ProtocolTransport,
    auth::TokenSet,
    command::PROTOCOL_VERSION,
    registry::Registry,
    session::Session,
    thread::{PoolError, ThreadPool},
    transport::TransportError,
};

pub const BANNER_SIZE: usize = 50;
pub const BANNER_PREFIX: &str = "Rime Server (v";

/// Fixed-width greeting sent before anything else on a new connection.
pub fn banner() -> [u8; BANNER_SIZE] {
    let text = format!("{BANNER_PREFIX}{PROTOCOL_VERSION})\r\n");
    let mut banner = [0; BANNER_SIZE];
    banner[..text.len()].copy_from_slice(text.as_bytes());
    banner
}

const TEXT_MODE_REPLY: &[u8] = b"ERR text protocol is not supported, use the binary protocol\r\n";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Server IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("worker dropped the connection")]
    WorkerLost,
}

/// Accepts connections and serves each one until it closes.
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    pool: Arc<ThreadPool>,
    idle_timeout: Option<Duration>,
}

impl Server {
    pub fn bind(config: &ServerConfig, db: Arc<dyn Database>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.address).map_err(|source| ServerError::Bind {
            address: config.address,
            source,
        })?;
        let dispatcher = Dispatcher::new(
            db,
            Arc::new(Registry::new()),
            Arc::new(TokenSet::new()),
        );
        Ok(Self {
            listener,
            dispatcher,
            pool: Arc::new(ThreadPool::new(config.workers)?),
            idle_timeout: config.idle_timeout(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.dispatcher.registry())
    }

    pub fn listen(self) -> Result<(), ServerError> {
        info!(
            "listening at {} with {} workers",
            self.local_addr()?,
            self.pool.size()
        );

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let dispatcher = self.dispatcher.clone();
                    let pool = Arc::clone(&self.pool);
                    let idle_timeout = self.idle_timeout;
                    let spawned = thread::Builder::new()
                        .name("rime-connection".into())
                        .spawn(move || serve(stream, dispatcher, pool, idle_timeout));
                    if let Err(e) = spawned {
                        warn!("failed to start connection thread: {e}");
                    }
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }
}

struct Connection {
    transport: ProtocolTransport<TcpStream>,
    session: Session,
}

fn serve(
    stream: TcpStream,
    dispatcher: Dispatcher,
    pool: Arc<ThreadPool>,
    idle_timeout: Option<Duration>,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let registry = Arc::clone(dispatcher.registry());
    let info = registry.register(peer.clone(), stream.try_clone().ok());
    let id = info.id();
    info!("connection {id} from {peer}");

    let session = Session::new(Arc::clone(&info));
    match run(stream, session, &dispatcher, &pool, idle_timeout) {
        Ok(()) => {}
        Err(e) if info.is_killed() => debug!("connection {id} killed: {e}"),
        Err(e) => warn!("connection {id} failed: {e}"),
    }

    registry.remove(id);
    info!("connection {id} closed");
}

/// Request loop of one connection. The session is released when this returns.
fn run(
    stream: TcpStream,
    session: Session,
    dispatcher: &Dispatcher,
    pool: &ThreadPool,
    idle_timeout: Option<Duration>,
) -> Result<(), ServerError> {
    stream.set_read_timeout(idle_timeout)?;
    stream.set_nodelay(true)?;

    let mut conn = Connection {
        transport: ProtocolTransport::new(stream),
        session,
    };
    conn.transport.output().put_raw(&banner());
    conn.transport.write()?;

    let mut first = true;
    loop {
        match conn.transport.wait_readable() {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) if e.is_timeout() => {
                info!("{}: idle timeout", conn.session.session_id());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        if conn.session.info().is_killed() {
            return Ok(());
        }

        if first {
            first = false;
            if conn.transport.need(1)?[0].is_ascii_uppercase() {
                conn.session.set_text_mode(true);
                warn!("{}: rejecting text protocol", conn.session.session_id());
                conn.transport.discard();
                conn.transport.output().put_raw(TEXT_MODE_REPLY);
                conn.transport.write()?;
                return Ok(());
            }
        }

        let (tx, rx) = mpsc::channel();
        let dispatcher = dispatcher.clone();
        pool.execute(move || {
            let mut conn = conn;
            let result = dispatcher.handle(&mut conn.session, &mut conn.transport);
            // the connection thread only goes away after receiving
            let _ = tx.send((conn, result));
        })?;
        let (returned, result) = rx.recv().map_err(|_| ServerError::WorkerLost)?;
        conn = returned;
        result?;
    }
}
