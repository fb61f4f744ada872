//! Device simulator serving the maintenance link over TCP.
//!
//! One companion tool is served at a time. While a peer is connected,
//! further connections wait in the listen backlog.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::DeviceInfo;
use crate::session::{SessionHandle, SessionManager, SessionTimeouts};
use crate::storage::LocalFileSystem;
use crate::transport::{TcpSerialPort, Transport};

/// How often the accept loop checks for shutdown while no peer is connected.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// A bound maintenance link server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    fs: LocalFileSystem,
    device: DeviceInfo,
    inter_byte_timeout: Duration,
    timeouts: SessionTimeouts,
}

impl Server {
    /// Bind to `config.server.listen` and prepare the storage root.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the storage
    /// root cannot be created.
    pub fn bind(config: &Config) -> Result<Self> {
        let fs = LocalFileSystem::new(config.storage_root());
        fs.ensure_layout()?;

        let addr = &config.server.listen;
        let listen_err = |source| Error::Listen {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(listen_err)?;
        listener.set_nonblocking(true).map_err(listen_err)?;

        Ok(Self {
            listener,
            fs,
            device: config.device_info(),
            inter_byte_timeout: config.inter_byte_timeout(),
            timeouts: config.session_timeouts(),
        })
    }

    /// The address actually bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Storage root the flights are served from.
    #[must_use]
    pub fn storage_root(&self) -> &Path {
        self.fs.root()
    }

    /// Accept and serve peers one at a time until `handle` is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails or a response cannot be framed.
    pub fn serve(&self, handle: &SessionHandle) -> Result<()> {
        info!(
            "Serving {} flights from {}",
            self.device.name,
            self.fs.root().display()
        );
        while !handle.should_stop() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    info!(%addr, "Peer connected");
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(%addr, error = %e, "Cannot configure peer socket");
                        continue;
                    }
                    let port = match TcpSerialPort::new(stream) {
                        Ok(port) => port,
                        Err(e) => {
                            warn!(%addr, error = %e, "Cannot configure peer socket");
                            continue;
                        }
                    };
                    self.serve_peer(port, handle)?;
                    info!(%addr, "Peer disconnected");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(Error::Listen {
                        addr: self
                            .local_addr()
                            .map_or_else(|_| "<unknown>".to_string(), |a| a.to_string()),
                        source,
                    })
                }
            }
        }
        info!("Server stopped");
        Ok(())
    }

    fn serve_peer(&self, port: TcpSerialPort, handle: &SessionHandle) -> Result<()> {
        let transport = Transport::new(port, self.inter_byte_timeout);
        let mut manager =
            SessionManager::new(transport, self.fs.clone(), self.device.clone(), self.timeouts);
        manager.run(handle)
    }
}

/// Bind and serve until `handle` is stopped.
///
/// # Errors
///
/// See [`Server::bind`] and [`Server::serve`].
pub fn serve(config: &Config, handle: &SessionHandle) -> Result<()> {
    Server::bind(config)?.serve(handle)
}

/// Serve on a dedicated blocking task until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails or its task panics.
pub async fn run_until_shutdown(config: Config) -> Result<()> {
    let handle = SessionHandle::new();
    let server = Server::bind(&config)?;
    info!("Listening on {}", server.local_addr()?);

    let task_handle = handle.clone();
    let mut task = tokio::task::spawn_blocking(move || server.serve(&task_handle));

    tokio::select! {
        result = &mut task => {
            return result.map_err(|e| Error::internal(format!("server task failed: {e}")))?;
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Cannot listen for Ctrl-C");
            }
            info!("Shutting down after the current dialogue");
            handle.stop();
        }
    }

    task.await
        .map_err(|e| Error::internal(format!("server task failed: {e}")))?
}
