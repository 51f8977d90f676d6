//! Trivmux server.
//!
//! Exposes the session state machine over TCP: one connection is one
//! session, opened on accept and closed on disconnect. Requests use the
//! length-prefixed protocol in [`wire`].
//!
//! # Architecture
//!
//! ```text
//!  TcpStream ──> serve_connection ──spawn_blocking──> SessionTable ──> Session
//!                                                          │
//!                                                   SessionManager ──> Engine ──> SimRegisterFile
//! ```
//!
//! Engine work blocks while polling, so every table call runs on tokio's
//! blocking pool. The async side never holds the engine's exclusive domain.
//!
//! # Components
//!
//! - [`Server`]: listener, accept loop, shutdown
//! - [`SessionTable`]: handle → session map with a session limit
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod system_env;
mod table;
pub mod wire;

use std::{io, net::SocketAddr, sync::Arc};

use bytes::{Bytes, BytesMut};
pub use error::ServerError;
pub use system_env::SystemEnv;
pub use table::{SessionHandle, SessionTable, TableConfig, TableError};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
};
use trivmux_core::{
    DEFAULT_REPLAY_LIMIT, Engine, Environment, PollConfig, RegisterPort, ResultCode,
    SessionManager,
};
use trivmux_harness::SimRegisterFile;
use wire::{HEADER_LEN, Request, RequestHeader, Response, WireError};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "127.0.0.1:7070")
    pub bind_address: String,
    /// Session limits
    pub table: TableConfig,
    /// Engine poll limits
    pub poll: PollConfig,
    /// Most discard words one context swap may replay
    pub replay_limit: u64,
    /// Extra status reads the emulated engine needs per operation
    pub emulator_latency: u32,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7070".to_string(),
            table: TableConfig::default(),
            poll: PollConfig::default(),
            replay_limit: DEFAULT_REPLAY_LIMIT,
            emulator_latency: 0,
        }
    }
}

/// Production trivmux server backed by the register-level emulator.
pub struct Server {
    listener: TcpListener,
    table: Arc<SessionTable<SimRegisterFile, SystemEnv>>,
}

impl Server {
    /// Build the engine stack and bind the listener.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` if the limits are unusable or the address
    /// cannot be bound.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        if config.table.max_sessions == 0 {
            return Err(ServerError::Config("max_sessions must be at least 1".to_string()));
        }
        if config.poll.timeout.is_zero() {
            return Err(ServerError::Config("poll timeout must be positive".to_string()));
        }

        let env = SystemEnv::new();
        let device = SimRegisterFile::with_latency(config.emulator_latency);
        let engine = Engine::new(device, env.clone(), config.poll);
        let manager = Arc::new(SessionManager::with_replay_limit(engine, config.replay_limit));
        let table = Arc::new(SessionTable::new(manager, env, config.table));

        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Config(format!("cannot bind {}: {e}", config.bind_address))
        })?;

        Ok(Self { listener, table })
    }

    /// Accept connections until the task is dropped.
    ///
    /// # Errors
    ///
    /// `ServerError::Transport` if the listener's address cannot be read.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let table = Arc::clone(&self.table);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, table).await {
                            tracing::debug!(%peer, "Connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }

    /// Serve until `shutdown` resolves, then stop the engine.
    ///
    /// The engine is stopped whether serving ends by signal, by a failed
    /// signal handler or by an error from [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// `ServerError::Transport` if `shutdown` fails or the listener's
    /// address cannot be read.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = io::Result<()>>,
    {
        let table = self.table();

        let outcome = tokio::select! {
            result = self.run() => result,
            signal = shutdown => {
                tracing::info!(open = table.len(), "Shutting down");
                signal.map_err(ServerError::from)
            },
        };

        table.manager().shutdown();
        outcome
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Session table shared by all connections.
    pub fn table(&self) -> Arc<SessionTable<SimRegisterFile, SystemEnv>> {
        Arc::clone(&self.table)
    }
}

/// Serve one connection as one session.
///
/// Opens a session, answers requests until the peer closes its write half,
/// then closes the session. If the table is full, one `Resource` error
/// response is sent and the connection ends.
///
/// # Errors
///
/// - `ServerError::Transport` on I/O failure
/// - `ServerError::Protocol` for an oversized request (after the error
///   response has been sent)
pub async fn serve_connection<S, P, E>(
    mut stream: S,
    table: Arc<SessionTable<P, E>>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: RegisterPort + 'static,
    E: Environment,
{
    let handle = match table.open() {
        Ok(handle) => handle,
        Err(err) => {
            send(&mut stream, &Response::error(err.code(), err.to_string())).await?;
            return Ok(());
        },
    };

    let result = serve_session(&mut stream, &table, handle).await;
    table.close(handle);
    result
}

async fn serve_session<S, P, E>(
    stream: &mut S,
    table: &Arc<SessionTable<P, E>>,
    handle: SessionHandle,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: RegisterPort + 'static,
    E: Environment,
{
    let mut header = [0u8; HEADER_LEN];

    loop {
        match stream.read_exact(&mut header).await {
            Ok(_) => {},
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let request = match RequestHeader::decode(&header) {
            Ok(header) => {
                let payload = read_payload(stream, header.len).await?;
                Request::from_parts(header.opcode, payload)
            },
            Err(WireError::UnknownOpcode { opcode, len }) => {
                read_payload(stream, len).await?;
                Err(WireError::UnknownOpcode { opcode, len })
            },
            Err(err) => {
                tracing::warn!(session = %handle, "Rejecting request: {}", err);
                send(stream, &Response::error(ResultCode::Access, err.to_string())).await?;
                return Err(err.into());
            },
        };

        let response = match request {
            Ok(request) => {
                let table = Arc::clone(table);
                tokio::task::spawn_blocking(move || execute(&table, handle, request)).await?
            },
            Err(err) => Response::error(ResultCode::Access, err.to_string()),
        };
        send(stream, &response).await?;
    }
}

fn execute<P: RegisterPort, E: Environment>(
    table: &SessionTable<P, E>,
    handle: SessionHandle,
    request: Request,
) -> Response {
    let result = match request {
        Request::Write(data) => table.write(handle, &data).map(|accepted| {
            Response::written(u32::try_from(accepted).unwrap_or(u32::MAX))
        }),
        Request::Read(count) => {
            table.read(handle, count as usize).map(|bytes| Response::Ok(Bytes::from(bytes)))
        },
    };

    result.unwrap_or_else(|err| {
        tracing::debug!(session = %handle, code = %err.code(), "Request failed: {}", err);
        Response::error(err.code(), err.to_string())
    })
}

async fn read_payload<S: AsyncRead + Unpin>(stream: &mut S, len: usize) -> io::Result<Bytes> {
    let mut payload = BytesMut::zeroed(len);
    stream.read_exact(&mut payload).await?;
    Ok(payload.freeze())
}

async fn send<S: AsyncWrite + Unpin>(stream: &mut S, response: &Response) -> Result<(), ServerError> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    response.encode(&mut buf)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}
