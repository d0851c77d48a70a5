//! Unix stream socket transport
//!
//! Frames are fixed size (`TXN_ID_SIZE + max_payload_size`), so no length
//! prefix is needed. A file descriptor is passed with `SCM_RIGHTS` on the
//! first chunk of its frame. Peer credentials come from `SO_PEERCRED`.

use std::io::{IoSlice, IoSliceMut};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::socket::{
    getsockopt, recvmsg, sendmsg, sockopt, ControlMessage, ControlMessageOwned, MsgFlags,
    UnixAddr,
};

use crate::frame::{Frame, TXN_ID_SIZE};
use crate::transport::{
    Credentials, InboundSink, Transport, TransportError, TransportEvent, TransportKind,
};

/// One end of a unix stream connection
pub struct UnixTransport {
    stream: UnixStream,
    max_payload_size: usize,
    write_lock: parking_lot::Mutex<()>,
    closed: Arc<AtomicBool>,
    peer_closed: Arc<AtomicBool>,
    credentials: Option<Credentials>,
}

impl UnixTransport {
    /// Wraps a connected stream that carries frames of the given payload size
    pub fn new(stream: UnixStream, max_payload_size: usize) -> Self {
        let credentials = match getsockopt(&stream, sockopt::PeerCredentials) {
            Ok(creds) => Some(Credentials {
                uid: creds.uid(),
                pid: creds.pid(),
            }),
            Err(err) => {
                tracing::warn!(error = %err, "could not read peer credentials");
                None
            }
        };
        Self {
            stream,
            max_payload_size,
            write_lock: parking_lot::Mutex::new(()),
            closed: Arc::new(AtomicBool::new(false)),
            peer_closed: Arc::new(AtomicBool::new(false)),
            credentials,
        }
    }

    /// Encoded size of every frame on this connection
    pub fn frame_len(&self) -> usize {
        TXN_ID_SIZE + self.max_payload_size
    }

    fn send_chunk(&self, bytes: &[u8], fds: &[RawFd]) -> Result<usize, TransportError> {
        let rights = [ControlMessage::ScmRights(fds)];
        let cmsgs: &[ControlMessage<'_>] = if fds.is_empty() { &[] } else { &rights };
        loop {
            match sendmsg::<UnixAddr>(
                self.stream.as_raw_fd(),
                &[IoSlice::new(bytes)],
                cmsgs,
                MsgFlags::MSG_NOSIGNAL,
                None,
            ) {
                Ok(0) => {
                    return Err(TransportError::CommError(
                        "socket accepted zero bytes".to_string(),
                    ))
                }
                Ok(sent) => return Ok(sent),
                Err(nix::Error::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn recv_chunk(stream: &UnixStream, buf: &mut [u8]) -> Result<(usize, Vec<OwnedFd>), TransportError> {
    loop {
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);
        let mut iov = [IoSliceMut::new(&mut *buf)];
        let msg = match recvmsg::<UnixAddr>(
            stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::MSG_CMSG_CLOEXEC,
        ) {
            Ok(msg) => msg,
            Err(nix::Error::EINTR) => continue,
            Err(err) => return Err(err.into()),
        };

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs()? {
            if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                // SAFETY: SCM_RIGHTS hands us freshly installed descriptors we now own.
                fds.extend(
                    raw_fds
                        .into_iter()
                        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                );
            }
        }
        return Ok((msg.bytes, fds));
    }
}

fn recv_frame(
    stream: &UnixStream,
    max_payload_size: usize,
) -> Result<Frame, TransportError> {
    let mut bytes = vec![0u8; TXN_ID_SIZE + max_payload_size];
    let mut filled = 0;
    let mut fd = None;

    while filled < bytes.len() {
        let (received, fds) = recv_chunk(stream, &mut bytes[filled..])?;
        if received == 0 {
            return Err(TransportError::Closed);
        }
        for extra in fds {
            if fd.is_none() {
                fd = Some(extra);
            } else {
                tracing::warn!("dropping extra file descriptor received with frame");
            }
        }
        filled += received;
    }

    Frame::from_bytes_sized(&bytes, max_payload_size)
        .map(|frame| frame.with_fd(fd))
        .map_err(|err| TransportError::CommError(err.to_string()))
}

impl Transport for UnixTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Unix
    }

    fn start(&self, sink: InboundSink) {
        let stream = match self.stream.try_clone() {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "could not clone socket for reader");
                self.peer_closed.store(true, Ordering::Release);
                sink(TransportEvent::Closed);
                return;
            }
        };
        let max_payload_size = self.max_payload_size;
        let closed = Arc::clone(&self.closed);
        let peer_closed = Arc::clone(&self.peer_closed);
        let name = format!("unix-rx-{}", self.stream.as_raw_fd());

        let spawned = std::thread::Builder::new().name(name).spawn(move || loop {
            match recv_frame(&stream, max_payload_size) {
                Ok(frame) => sink(TransportEvent::Frame(frame)),
                Err(err) => {
                    if !closed.load(Ordering::Acquire) {
                        tracing::debug!(error = %err, "unix peer went away");
                        peer_closed.store(true, Ordering::Release);
                        sink(TransportEvent::Closed);
                    }
                    break;
                }
            }
        });
        if let Err(err) = spawned {
            tracing::error!(error = %err, "could not spawn socket reader");
        }
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if frame.payload.len() != self.max_payload_size {
            return Err(TransportError::CommError(format!(
                "frame payload is {} bytes, connection carries {}",
                frame.payload.len(),
                self.max_payload_size
            )));
        }

        let bytes = frame.to_bytes();
        let _guard = self.write_lock.lock();

        let mut sent = match &frame.fd {
            Some(fd) => self.send_chunk(&bytes, &[fd.as_raw_fd()])?,
            None => 0,
        };
        while sent < bytes.len() {
            sent += self.send_chunk(&bytes[sent..], &[])?;
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            tracing::debug!(error = %err, "socket shutdown failed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.peer_closed.load(Ordering::Acquire)
    }

    fn peer_credentials(&self) -> Option<Credentials> {
        self.credentials
    }
}

impl Drop for UnixTransport {
    fn drop(&mut self) {
        self.close();
    }
}
