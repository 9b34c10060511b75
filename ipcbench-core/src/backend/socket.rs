// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `socket` backend: Unix domain stream sockets, one explicit send per reader.
//!
//! The writer listens on `{resource_dir}/{identity}.sock`. Each reader connects
//! and introduces itself with its rank. Every write is sealed once and queued
//! to a sender thread per reader, so a slow reader never blocks the others.
//!
//! Frames are `u32 little-endian length | envelope`.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{require_role, Backend, Delivery, Endpoint, FanOut};
use crate::dataset::Dataset;
use crate::error::BackendError;
use crate::types::Role;

const NAME: &str = "socket";

/// Upper bound on one frame, matching the envelope limit plus header.
const MAX_FRAME: usize = crate::envelope::MAX_PAYLOAD_SIZE + crate::envelope::HEADER_SIZE;

type Accepted = std::io::Result<Vec<(usize, UnixStream)>>;

/// One queued delivery: the sealed payload and how many frames to emit.
type Job = (Arc<Vec<u8>>, u32);

struct Peer {
    rank: usize,
    queue: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<std::io::Result<()>>>,
}

enum Side {
    Writer {
        path: PathBuf,
        acceptor: Option<JoinHandle<Accepted>>,
        peers: Vec<Peer>,
    },
    Reader {
        stream: UnixStream,
    },
}

/// Point-to-point message-passing backend.
pub struct SocketBackend {
    resource_dir: PathBuf,
    timeout: Duration,
    endpoint: Option<Endpoint>,
    side: Option<Side>,
    sends: u64,
}

impl SocketBackend {
    pub fn new(resource_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            resource_dir: resource_dir.into(),
            timeout,
            endpoint: None,
            side: None,
            sends: 0,
        }
    }

    fn socket_path(&self, endpoint: &Endpoint) -> PathBuf {
        self.resource_dir
            .join(format!("{}.sock", endpoint.identity.as_str()))
    }

    fn bind(&self, endpoint: &Endpoint) -> Result<Side, BackendError> {
        std::fs::create_dir_all(&self.resource_dir).map_err(|e| BackendError::Unavailable {
            backend: NAME.to_string(),
            reason: format!("cannot create {}: {}", self.resource_dir.display(), e),
        })?;

        let path = self.socket_path(endpoint);
        let conflict = || BackendError::ResourceConflict {
            backend: NAME.to_string(),
            identity: endpoint.identity.to_string(),
        };

        // A leftover socket file means a previous run never released it.
        if path.exists() {
            return Err(conflict());
        }

        let listener = UnixListener::bind(&path).map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => conflict(),
            _ => BackendError::io(NAME, "initialize", e),
        })?;

        let readers = endpoint.readers;
        let deadline = Instant::now() + self.timeout;
        let timeout = self.timeout;
        let acceptor = std::thread::Builder::new()
            .name(format!("{}-accept", NAME))
            .spawn(move || accept_readers(listener, readers, deadline, timeout))
            .map_err(|e| BackendError::io(NAME, "initialize", e))?;

        tracing::debug!(backend = NAME, path = %path.display(), readers = readers, "Listening");

        Ok(Side::Writer {
            path,
            acceptor: Some(acceptor),
            peers: Vec::new(),
        })
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<Side, BackendError> {
        let path = self.socket_path(endpoint);
        let mut stream =
            UnixStream::connect(&path).map_err(|e| BackendError::io(NAME, "initialize", e))?;

        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
            .and_then(|_| stream.write_all(&(endpoint.rank as u32).to_le_bytes()))
            .map_err(|e| BackendError::io(NAME, "initialize", e))?;

        tracing::debug!(backend = NAME, path = %path.display(), rank = endpoint.rank, "Connected");
        Ok(Side::Reader { stream })
    }
}

fn accept_readers(
    listener: UnixListener,
    readers: usize,
    deadline: Instant,
    timeout: Duration,
) -> Accepted {
    listener.set_nonblocking(true)?;
    let mut accepted: Vec<(usize, UnixStream)> = Vec::with_capacity(readers);

    while accepted.len() < readers {
        match listener.accept() {
            Ok((mut stream, _)) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;

                let mut hello = [0u8; 4];
                stream.read_exact(&mut hello)?;
                let rank = u32::from_le_bytes(hello) as usize;

                if rank == 0 || rank > readers || accepted.iter().any(|(r, _)| *r == rank) {
                    return Err(std::io::Error::new(
                        ErrorKind::InvalidData,
                        format!("unexpected reader rank {}", rank),
                    ));
                }
                accepted.push((rank, stream));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(std::io::Error::new(
                        ErrorKind::TimedOut,
                        format!("{} of {} readers connected", accepted.len(), readers),
                    ));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }

    accepted.sort_by_key(|(rank, _)| *rank);
    Ok(accepted)
}

fn send_frames(mut stream: UnixStream, jobs: mpsc::Receiver<Job>) -> std::io::Result<()> {
    for (payload, copies) in jobs {
        let len = (payload.len() as u32).to_le_bytes();
        for _ in 0..copies {
            stream.write_all(&len)?;
            stream.write_all(&payload)?;
        }
    }
    stream.flush()
}

fn read_frame(stream: &mut UnixStream) -> Result<Vec<u8>, BackendError> {
    let receive_error = |e: std::io::Error| match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            BackendError::io(NAME, "read", "receive timed out")
        }
        ErrorKind::UnexpectedEof => BackendError::io(NAME, "read", "writer closed the connection"),
        _ => BackendError::io(NAME, "read", e),
    };

    let mut len = [0u8; 4];
    stream.read_exact(&mut len).map_err(receive_error)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME {
        return Err(BackendError::io(
            NAME,
            "read",
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).map_err(receive_error)?;
    Ok(frame)
}

/// Wait for the acceptor and start one sender thread per reader.
fn start_peers(
    acceptor: &mut Option<JoinHandle<Accepted>>,
    peers: &mut Vec<Peer>,
) -> Result<(), BackendError> {
    let Some(handle) = acceptor.take() else {
        return Ok(());
    };

    let streams = handle
        .join()
        .map_err(|_| BackendError::io(NAME, "accept", "acceptor thread panicked"))?
        .map_err(|e| BackendError::io(NAME, "accept", e))?;

    for (rank, stream) in streams {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name(format!("{}-send-{}", NAME, rank))
            .spawn(move || send_frames(stream, rx))
            .map_err(|e| BackendError::io(NAME, "accept", e))?;
        peers.push(Peer {
            rank,
            queue: Some(tx),
            worker: Some(worker),
        });
    }
    Ok(())
}

fn remove_socket_file(path: &Path) -> Result<(), BackendError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackendError::io(NAME, "cleanup", e)),
    }
}

impl Backend for SocketBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn delivery(&self) -> Delivery {
        Delivery::MessagePassing(FanOut::PointToPoint)
    }

    fn initialize(&mut self, endpoint: &Endpoint) -> Result<(), BackendError> {
        let side = match endpoint.role {
            Role::Writer => self.bind(endpoint)?,
            Role::Reader => self.connect(endpoint)?,
        };
        self.side = Some(side);
        self.endpoint = Some(endpoint.clone());
        Ok(())
    }

    fn write(&mut self, dataset: &Dataset) -> Result<(), BackendError> {
        let endpoint = require_role(NAME, self.endpoint.as_ref(), Role::Writer, "write")?;
        let copies = endpoint.deliveries_per_write;
        let readers = endpoint.readers;

        let Some(Side::Writer {
            acceptor, peers, ..
        }) = self.side.as_mut()
        else {
            return Err(BackendError::io(NAME, "write", "socket not bound"));
        };
        start_peers(acceptor, peers)?;

        let payload = Arc::new(dataset.seal()?);
        for peer in peers.iter() {
            let queued = peer
                .queue
                .as_ref()
                .map(|q| q.send((Arc::clone(&payload), copies)).is_ok())
                .unwrap_or(false);
            if !queued {
                return Err(BackendError::io(
                    NAME,
                    "write",
                    format!("reader {} disconnected", peer.rank),
                ));
            }
        }

        self.sends += self.delivery().sends_per_write(readers, copies);
        Ok(())
    }

    fn read(&mut self) -> Result<Dataset, BackendError> {
        require_role(NAME, self.endpoint.as_ref(), Role::Reader, "read")?;
        let Some(Side::Reader { stream }) = self.side.as_mut() else {
            return Err(BackendError::io(NAME, "read", "socket not connected"));
        };
        let frame = read_frame(stream)?;
        Ok(Dataset::open(&frame)?)
    }

    fn cleanup(&mut self) -> Result<(), BackendError> {
        self.endpoint = None;
        let Some(side) = self.side.take() else {
            return Ok(());
        };

        match side {
            Side::Reader { stream } => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                Ok(())
            }
            Side::Writer {
                path,
                acceptor,
                mut peers,
            } => {
                let mut first_error = None;

                if let Some(handle) = acceptor {
                    // Nobody ever wrote; the accepted streams are simply dropped.
                    if let Ok(Err(e)) = handle.join() {
                        tracing::debug!(backend = NAME, error = %e, "Acceptor finished with error");
                    }
                }

                for peer in peers.iter_mut() {
                    peer.queue.take();
                    let outcome = match peer.worker.take().map(|w| w.join()) {
                        Some(Ok(result)) => result.map_err(|e| BackendError::io(NAME, "send", e)),
                        Some(Err(_)) => {
                            Err(BackendError::io(NAME, "send", "sender thread panicked"))
                        }
                        None => Ok(()),
                    };
                    if let Err(e) = outcome {
                        tracing::warn!(
                            backend = NAME,
                            reader = peer.rank,
                            error = %e,
                            "Undelivered frames"
                        );
                        first_error.get_or_insert(e);
                    }
                }

                let removed = remove_socket_file(&path);
                tracing::debug!(backend = NAME, path = %path.display(), "Closed listener");

                match first_error {
                    Some(e) => Err(e),
                    None => removed,
                }
            }
        }
    }

    fn sends(&self) -> u64 {
        self.sends
    }
}

impl Drop for SocketBackend {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::error!(backend = NAME, error = %e, "Failed to release socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BenchmarkCell, ResourceIdentity, ScenarioKind};

    fn endpoint(cell: &BenchmarkCell, identity: &str, rank: usize, size: usize) -> Endpoint {
        Endpoint::for_cell(cell, ResourceIdentity::new(identity).unwrap(), rank, size)
    }

    #[test]
    fn test_fan_out_to_every_reader() {
        let tmp = tempfile::tempdir().unwrap();
        let cell = BenchmarkCell::new(NAME, ScenarioKind::Shared, 4, 3).unwrap();
        let timeout = Duration::from_secs(5);

        let mut writer = SocketBackend::new(tmp.path(), timeout);
        writer.initialize(&endpoint(&cell, "sock_fan", 0, 3)).unwrap();

        let mut readers: Vec<SocketBackend> = (1..3)
            .map(|rank| {
                let mut r = SocketBackend::new(tmp.path(), timeout);
                r.initialize(&endpoint(&cell, "sock_fan", rank, 3)).unwrap();
                r
            })
            .collect();

        let data = Dataset::for_cell(&cell);
        writer.write(&data).unwrap();
        // two readers, three copies each
        assert_eq!(writer.sends(), 6);

        for reader in readers.iter_mut() {
            for _ in 0..3 {
                assert_eq!(reader.read().unwrap(), data);
            }
        }

        writer.cleanup().unwrap();
        for reader in readers.iter_mut() {
            reader.cleanup().unwrap();
        }
        assert!(!tmp.path().join("sock_fan.sock").exists());
    }

    #[test]
    fn test_stale_socket_file_is_a_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("sock_stale.sock"), b"").unwrap();
        let cell = BenchmarkCell::new(NAME, ScenarioKind::Streaming, 1, 1).unwrap();

        let mut writer = SocketBackend::new(tmp.path(), Duration::from_millis(50));
        assert!(matches!(
            writer.initialize(&endpoint(&cell, "sock_stale", 0, 2)),
            Err(BackendError::ResourceConflict { .. })
        ));
    }

    #[test]
    fn test_read_times_out_without_writer_data() {
        let tmp = tempfile::tempdir().unwrap();
        let cell = BenchmarkCell::new(NAME, ScenarioKind::Streaming, 1, 1).unwrap();
        let timeout = Duration::from_millis(100);

        let mut writer = SocketBackend::new(tmp.path(), timeout);
        writer.initialize(&endpoint(&cell, "sock_quiet", 0, 2)).unwrap();
        let mut reader = SocketBackend::new(tmp.path(), timeout);
        reader.initialize(&endpoint(&cell, "sock_quiet", 1, 2)).unwrap();

        assert!(matches!(reader.read(), Err(BackendError::Io { .. })));
        reader.cleanup().unwrap();
        writer.cleanup().unwrap();
    }
}
