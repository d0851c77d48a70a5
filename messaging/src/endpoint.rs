//! Socket endpoints for services in other processes
//!
//! With a socket directory configured, every advertised service listens on
//! `<socket_dir>/<service name>`. A connection starts with a [`Hello`] /
//! [`HelloAck`] exchange and then carries fixed-size frames over a
//! [`UnixTransport`].

use std::fs;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use core_types::{RuntimeError, RuntimeResult};
use ipc::handshake::{read_message, write_message};
use ipc::{Hello, HelloAck, Protocol, Transport, TransportError, UnixTransport};

use crate::service::{Service, ServiceShared};
use crate::session::fatal_size_mismatch;

/// Bound on each handshake read
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Accept loop of one advertised service
pub(crate) struct Listener {
    path: PathBuf,
    stopped: Arc<AtomicBool>,
}

impl Listener {
    /// Binds `<dir>/<service name>` and starts accepting clients
    ///
    /// A stale socket file is replaced; one with a live listener behind it is
    /// reported as `AddrInUse`.
    pub(crate) fn bind(dir: &Path, service: &Service) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(service.name());
        if path.exists() {
            if UnixStream::connect(&path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} already has a listener", path.display()),
                ));
            }
            fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let weak = service.downgrade();
        thread::Builder::new()
            .name(format!("listen-{}", service.name()))
            .spawn(move || accept_loop(listener, weak, flag))?;

        tracing::debug!(path = %path.display(), "service listening");
        Ok(Self { path, stopped })
    }

    /// Stops accepting and removes the socket file
    pub(crate) fn stop(self) {
        self.stopped.store(true, Ordering::Release);
        // Wakes the accept loop so it sees the flag.
        let _ = UnixStream::connect(&self.path);
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %err, "could not remove socket");
        }
    }
}

fn accept_loop(listener: UnixListener, service: Weak<ServiceShared>, stopped: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };
        let Some(service) = Service::upgrade(&service) else {
            break;
        };
        if let Err(err) = serve_connection(stream, &service) {
            tracing::debug!(service = %service.key(), error = %err, "connection dropped during handshake");
        }
    }
}

fn serve_connection(stream: UnixStream, service: &Service) -> Result<(), TransportError> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let hello: Hello = read_message(&mut &stream)?;
    let max_payload_size = service.protocol().max_payload_size();

    if hello.service_name != service.name() || hello.protocol_id != service.protocol().id() {
        write_message(
            &mut &stream,
            &HelloAck::reject(max_payload_size, "no such service and protocol"),
        )?;
        return Ok(());
    }
    write_message(&mut &stream, &HelloAck::accept(max_payload_size))?;
    if hello.max_payload_size != max_payload_size {
        tracing::warn!(
            service = %service.key(),
            client = hello.max_payload_size,
            server = max_payload_size,
            "client uses a different maximum payload size"
        );
        return Ok(());
    }

    stream.set_read_timeout(None)?;
    let transport = UnixTransport::new(stream, max_payload_size);
    let credentials = transport.peer_credentials();
    service
        .accept(Arc::new(transport), None, credentials)
        .map_err(|err| TransportError::CommError(err.to_string()))
}

/// Connects to a service listening in `dir`
///
/// `Ok(None)` means nobody is listening or the service refused.
pub(crate) fn connect(
    dir: &Path,
    service_name: &str,
    protocol: &Protocol,
) -> RuntimeResult<Option<UnixTransport>> {
    let path = dir.join(service_name);
    let stream = match UnixStream::connect(&path) {
        Ok(stream) => stream,
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Ok(None)
        }
        Err(err) => return Err(RuntimeError::from(TransportError::from(err))),
    };

    let hello = Hello {
        service_name: service_name.to_string(),
        protocol_id: protocol.id().to_string(),
        max_payload_size: protocol.max_payload_size(),
    };
    let ack = stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(ipc::HandshakeError::from)
        .and_then(|()| write_message(&mut &stream, &hello))
        .and_then(|()| read_message::<HelloAck>(&mut &stream));
    let ack = match ack {
        Ok(ack) => ack,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "handshake failed");
            return Ok(None);
        }
    };

    if !ack.accepted {
        tracing::debug!(
            path = %path.display(),
            reason = ack.reason.as_deref().unwrap_or("unspecified"),
            "service refused connection"
        );
        return Ok(None);
    }
    if ack.max_payload_size != protocol.max_payload_size() {
        fatal_size_mismatch(protocol.id(), protocol.max_payload_size(), ack.max_payload_size);
    }

    stream
        .set_read_timeout(None)
        .map_err(|err| RuntimeError::from(TransportError::from(err)))?;
    Ok(Some(UnixTransport::new(stream, protocol.max_payload_size())))
}
