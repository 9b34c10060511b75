// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Multi-process communicator over a Unix socket hub.
//!
//! Rank 0 binds the coordinator socket and every other rank connects to it.
//! A barrier is a round trip: members send `Arrive { tag }`, the hub compares
//! each tag with its own and answers `Release` (or `Abort` on divergence).
//! Gather is one part frame per member, collected by the hub in rank order.
//!
//! Frames are `kind u8 | length u64 little-endian | body`. Control frames carry
//! JSON; part frames carry the gathered bytes as they are.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::Communicator;
use crate::config::CoordinationSettings;
use crate::error::{ConfigurationError, CoordinationError};

pub const ENV_RANK: &str = "IPCBENCH_RANK";
pub const ENV_SIZE: &str = "IPCBENCH_SIZE";
pub const ENV_COORDINATOR: &str = "IPCBENCH_COORDINATOR";
pub const ENV_RUN_ID: &str = "IPCBENCH_RUN_ID";

/// Largest gather part a member may send.
pub const MAX_PART: usize = 1024 * 1024 * 1024;

/// Largest control frame accepted from a peer.
const MAX_CONTROL: usize = 1024 * 1024;

const KIND_CONTROL: u8 = 0;
const KIND_PART: u8 = 1;
const HEADER_LEN: usize = 9;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Hello { rank: usize, run_id: String },
    Arrive { tag: String },
    Release,
    Abort { reason: String },
}

/// One frame off the wire.
#[derive(Debug)]
enum Message {
    Control(Frame),
    Part(Vec<u8>),
}

impl Message {
    fn describe(&self) -> String {
        match self {
            Message::Control(frame) => format!("{:?}", frame),
            Message::Part(bytes) => format!("part of {} bytes", bytes.len()),
        }
    }
}

/// Group membership handed over by the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEnv {
    pub rank: usize,
    pub size: usize,
    pub coordinator: PathBuf,
    pub run_id: String,
}

impl GroupEnv {
    /// Read membership from `IPCBENCH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`GroupEnv::from_env`] with an injectable lookup.
    pub fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let required = |var: &'static str| {
            lookup(var).ok_or(ConfigurationError::MissingEnvironment {
                var,
                reason: "not set".to_string(),
            })
        };
        let number = |var: &'static str| -> Result<usize, ConfigurationError> {
            let raw = required(var)?;
            raw.trim()
                .parse()
                .map_err(|e| ConfigurationError::MissingEnvironment {
                    var,
                    reason: format!("'{}' is not a number: {}", raw, e),
                })
        };

        let env = Self {
            rank: number(ENV_RANK)?,
            size: number(ENV_SIZE)?,
            coordinator: PathBuf::from(required(ENV_COORDINATOR)?),
            run_id: lookup(ENV_RUN_ID).unwrap_or_default(),
        };

        if env.rank >= env.size {
            return Err(ConfigurationError::MissingEnvironment {
                var: ENV_RANK,
                reason: format!("rank {} outside group of {}", env.rank, env.size),
            });
        }
        Ok(env)
    }
}

enum Link {
    Hub { members: Vec<UnixStream> },
    Member { hub: UnixStream },
}

/// Communicator for one OS process of a group.
pub struct SocketGroup {
    rank: usize,
    size: usize,
    barrier_timeout: Option<Duration>,
    link: Mutex<Link>,
    /// Socket file to remove on drop (hub only).
    bound: Option<PathBuf>,
}

impl SocketGroup {
    /// Bind (rank 0) or connect (other ranks) according to `env`.
    pub fn join(
        env: &GroupEnv,
        settings: &CoordinationSettings,
    ) -> Result<Self, CoordinationError> {
        let (link, bound) = if env.rank == 0 {
            let members = Self::host(env, settings.connect_timeout).map_err(|e| {
                remove_coordinator(&env.coordinator);
                e
            })?;
            (Link::Hub { members }, Some(env.coordinator.clone()))
        } else {
            let hub = Self::connect(env, settings.connect_timeout)?;
            (Link::Member { hub }, None)
        };

        tracing::info!(rank = env.rank, size = env.size, "Joined process group");

        Ok(Self {
            rank: env.rank,
            size: env.size,
            barrier_timeout: settings.barrier_timeout,
            link: Mutex::new(link),
            bound,
        })
    }

    fn host(
        env: &GroupEnv,
        connect_timeout: Duration,
    ) -> Result<Vec<UnixStream>, CoordinationError> {
        let unreachable = |reason: String| CoordinationError::Unreachable {
            path: env.coordinator.clone(),
            reason,
        };

        if env.coordinator.exists() {
            std::fs::remove_file(&env.coordinator).map_err(|e| unreachable(e.to_string()))?;
        }
        let listener =
            UnixListener::bind(&env.coordinator).map_err(|e| unreachable(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| unreachable(e.to_string()))?;

        let deadline = Instant::now() + connect_timeout;
        let mut slots: Vec<Option<UnixStream>> = (1..env.size).map(|_| None).collect();
        let mut joined = 0;

        while joined < env.size - 1 {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    stream
                        .set_nonblocking(false)
                        .and_then(|_| stream.set_read_timeout(Some(connect_timeout)))
                        .map_err(|e| unreachable(e.to_string()))?;

                    let (rank, run_id) = match read_frame(&mut stream, "hello", 0)? {
                        Message::Control(Frame::Hello { rank, run_id }) => (rank, run_id),
                        other => {
                            return Err(CoordinationError::Protocol {
                                reason: format!("expected hello, got {}", other.describe()),
                            })
                        }
                    };

                    if run_id != env.run_id {
                        return Err(CoordinationError::Protocol {
                            reason: format!("rank {} belongs to run '{}'", rank, run_id),
                        });
                    }
                    if rank == 0 || rank >= env.size || slots[rank - 1].is_some() {
                        return Err(CoordinationError::Protocol {
                            reason: format!("unexpected or duplicate rank {}", rank),
                        });
                    }

                    stream
                        .set_read_timeout(None)
                        .map_err(|e| unreachable(e.to_string()))?;
                    slots[rank - 1] = Some(stream);
                    joined += 1;
                    tracing::debug!(rank = rank, joined = joined, "Member joined");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(CoordinationError::Timeout {
                            tag: "join".to_string(),
                            waited_ms: connect_timeout.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(unreachable(e.to_string())),
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn connect(
        env: &GroupEnv,
        connect_timeout: Duration,
    ) -> Result<UnixStream, CoordinationError> {
        let deadline = Instant::now() + connect_timeout;

        let mut hub = loop {
            match UnixStream::connect(&env.coordinator) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline
                    && matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) =>
                {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    return Err(CoordinationError::Unreachable {
                        path: env.coordinator.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        };

        write_frame(
            &mut hub,
            &Frame::Hello {
                rank: env.rank,
                run_id: env.run_id.clone(),
            },
            0,
        )?;
        Ok(hub)
    }

    fn link(&self) -> Result<MutexGuard<'_, Link>, CoordinationError> {
        self.link.lock().map_err(|_| CoordinationError::Aborted {
            reason: "communicator lock poisoned".to_string(),
        })
    }

    fn arm(
        &self,
        stream: &UnixStream,
        deadline: Option<Instant>,
        tag: &str,
    ) -> Result<(), CoordinationError> {
        let timeout = match deadline {
            None => None,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(self.timeout_error(tag));
                }
                Some(left)
            }
        };
        stream
            .set_read_timeout(timeout)
            .map_err(|e| CoordinationError::Protocol {
                reason: format!("cannot arm read timeout: {}", e),
            })
    }

    fn timeout_error(&self, tag: &str) -> CoordinationError {
        CoordinationError::Timeout {
            tag: tag.to_string(),
            waited_ms: self
                .barrier_timeout
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }

    /// Hub side: tell every member to give up.
    fn broadcast_abort(members: &mut [UnixStream], reason: &str) {
        for (i, member) in members.iter_mut().enumerate() {
            let frame = Frame::Abort {
                reason: reason.to_string(),
            };
            if let Err(e) = write_frame(member, &frame, i + 1) {
                tracing::debug!(rank = i + 1, error = %e, "Could not deliver abort");
            }
        }
    }
}

fn frame_header(kind: u8, len: usize) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = kind;
    header[1..].copy_from_slice(&(len as u64).to_le_bytes());
    header
}

fn write_raw(
    stream: &mut UnixStream,
    kind: u8,
    body: &[u8],
    peer: usize,
) -> Result<(), CoordinationError> {
    stream
        .write_all(&frame_header(kind, body.len()))
        .and_then(|_| stream.write_all(body))
        .map_err(|e| CoordinationError::Disconnected {
            rank: peer,
            reason: e.to_string(),
        })
}

fn write_frame(
    stream: &mut UnixStream,
    frame: &Frame,
    peer: usize,
) -> Result<(), CoordinationError> {
    let body = serde_json::to_vec(frame).map_err(|e| CoordinationError::Protocol {
        reason: format!("encode failed: {}", e),
    })?;
    write_raw(stream, KIND_CONTROL, &body, peer)
}

fn write_part(stream: &mut UnixStream, part: &[u8], peer: usize) -> Result<(), CoordinationError> {
    if part.len() > MAX_PART {
        return Err(CoordinationError::Protocol {
            reason: format!("part of {} bytes exceeds {} bytes", part.len(), MAX_PART),
        });
    }
    write_raw(stream, KIND_PART, part, peer)
}

fn read_frame(
    stream: &mut UnixStream,
    tag: &str,
    peer: usize,
) -> Result<Message, CoordinationError> {
    let waited_ms = stream_timeout_ms(stream);
    let map = |e: std::io::Error| match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => CoordinationError::Timeout {
            tag: tag.to_string(),
            waited_ms,
        },
        _ => CoordinationError::Disconnected {
            rank: peer,
            reason: e.to_string(),
        },
    };

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).map_err(map)?;
    let kind = header[0];
    let mut len = [0u8; 8];
    len.copy_from_slice(&header[1..]);
    let len = u64::from_le_bytes(len);

    let limit = match kind {
        KIND_CONTROL => MAX_CONTROL,
        KIND_PART => MAX_PART,
        other => {
            return Err(CoordinationError::Protocol {
                reason: format!("unknown frame kind {} from rank {}", other, peer),
            })
        }
    };
    if len > limit as u64 {
        return Err(CoordinationError::Protocol {
            reason: format!("frame of {} bytes from rank {}", len, peer),
        });
    }

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).map_err(map)?;
    if kind == KIND_PART {
        return Ok(Message::Part(body));
    }

    serde_json::from_slice(&body)
        .map(Message::Control)
        .map_err(|e| CoordinationError::Protocol {
            reason: format!("bad frame from rank {}: {}", peer, e),
        })
}

fn stream_timeout_ms(stream: &UnixStream) -> u64 {
    stream
        .read_timeout()
        .ok()
        .flatten()
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl Communicator for SocketGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self, tag: &str) -> Result<(), CoordinationError> {
        let deadline = self.barrier_timeout.map(|t| Instant::now() + t);
        let mut link = self.link()?;

        match &mut *link {
            Link::Hub { members } => {
                for i in 0..members.len() {
                    let rank = i + 1;
                    self.arm(&members[i], deadline, tag)?;

                    let failure = match read_frame(&mut members[i], tag, rank) {
                        Ok(Message::Control(Frame::Arrive { tag: actual })) if actual == tag => {
                            continue
                        }
                        Ok(Message::Control(Frame::Arrive { tag: actual })) => {
                            CoordinationError::Diverged {
                                rank,
                                expected: tag.to_string(),
                                actual,
                            }
                        }
                        Ok(Message::Control(Frame::Abort { reason })) => {
                            CoordinationError::Aborted {
                                reason: format!("rank {}: {}", rank, reason),
                            }
                        }
                        Ok(other) => CoordinationError::Protocol {
                            reason: format!(
                                "rank {} sent {} at barrier '{}'",
                                rank,
                                other.describe(),
                                tag
                            ),
                        },
                        Err(e) => e,
                    };

                    Self::broadcast_abort(members, &failure.to_string());
                    return Err(failure);
                }

                for (i, member) in members.iter_mut().enumerate() {
                    write_frame(member, &Frame::Release, i + 1)?;
                }
                Ok(())
            }
            Link::Member { hub } => {
                write_frame(hub, &Frame::Arrive { tag: tag.to_string() }, 0)?;
                self.arm(hub, deadline, tag)?;

                match read_frame(hub, tag, 0)? {
                    Message::Control(Frame::Release) => Ok(()),
                    Message::Control(Frame::Abort { reason }) => {
                        Err(CoordinationError::Aborted { reason })
                    }
                    other => Err(CoordinationError::Protocol {
                        reason: format!("hub sent {} at barrier '{}'", other.describe(), tag),
                    }),
                }
            }
        }
    }

    fn gather(&self, part: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CoordinationError> {
        let deadline = self.barrier_timeout.map(|t| Instant::now() + t);
        let mut link = self.link()?;

        match &mut *link {
            Link::Hub { members } => {
                let mut parts = Vec::with_capacity(self.size);
                parts.push(part);

                for i in 0..members.len() {
                    let rank = i + 1;
                    self.arm(&members[i], deadline, "gather")?;
                    match read_frame(&mut members[i], "gather", rank)? {
                        Message::Part(bytes) => parts.push(bytes),
                        Message::Control(Frame::Abort { reason }) => {
                            let reason = format!("rank {}: {}", rank, reason);
                            Self::broadcast_abort(members, &reason);
                            return Err(CoordinationError::Aborted { reason });
                        }
                        other => {
                            return Err(CoordinationError::Protocol {
                                reason: format!(
                                    "rank {} sent {} during gather",
                                    rank,
                                    other.describe()
                                ),
                            })
                        }
                    }
                }
                Ok(Some(parts))
            }
            Link::Member { hub } => {
                write_part(hub, &part, 0)?;
                Ok(None)
            }
        }
    }

    fn max_part_len(&self) -> usize {
        MAX_PART
    }

    fn abort(&self, reason: &str) {
        let Ok(mut link) = self.link.lock() else {
            return;
        };
        match &mut *link {
            Link::Hub { members } => Self::broadcast_abort(members, reason),
            Link::Member { hub } => {
                let frame = Frame::Abort {
                    reason: reason.to_string(),
                };
                if let Err(e) = write_frame(hub, &frame, 0) {
                    tracing::debug!(error = %e, "Could not deliver abort");
                }
            }
        }
    }
}

impl Drop for SocketGroup {
    fn drop(&mut self) {
        if let Some(path) = self.bound.take() {
            remove_coordinator(&path);
        }
    }
}

fn remove_coordinator(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove coordinator socket"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(dir: &Path, rank: usize, size: usize) -> GroupEnv {
        GroupEnv {
            rank,
            size,
            coordinator: dir.join("coord.sock"),
            run_id: "test-run".to_string(),
        }
    }

    fn settings() -> CoordinationSettings {
        CoordinationSettings {
            barrier_timeout: Some(Duration::from_secs(10)),
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_env_parsing() {
        let vars: HashMap<&str, &str> = [
            (ENV_RANK, "2"),
            (ENV_SIZE, "4"),
            (ENV_COORDINATOR, "/tmp/x.sock"),
            (ENV_RUN_ID, "abc"),
        ]
        .into_iter()
        .collect();
        let env = GroupEnv::from_lookup(|v| vars.get(v).map(|s| s.to_string())).unwrap();
        assert_eq!(env.rank, 2);
        assert_eq!(env.size, 4);
        assert_eq!(env.run_id, "abc");

        let missing = GroupEnv::from_lookup(|v| {
            if v == ENV_SIZE {
                None
            } else {
                vars.get(v).map(|s| s.to_string())
            }
        });
        assert!(matches!(
            missing,
            Err(ConfigurationError::MissingEnvironment { var: ENV_SIZE, .. })
        ));

        let out_of_range = GroupEnv::from_lookup(|v| match v {
            ENV_RANK => Some("4".to_string()),
            _ => vars.get(v).map(|s| s.to_string()),
        });
        assert!(out_of_range.is_err());
    }

    #[test]
    fn test_barrier_and_gather_over_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let handles: Vec<_> = (0..3)
            .map(|rank| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let group = SocketGroup::join(&env(&path, rank, 3), &settings()).unwrap();
                    group.barrier("start").unwrap();
                    group.barrier("cell:shm/shared/10/1").unwrap();
                    let gathered = group.gather(vec![rank as u8; rank + 1]).unwrap();
                    group.barrier("end").unwrap();
                    gathered
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(
            results[0],
            Some(vec![vec![0u8], vec![1, 1], vec![2, 2, 2]])
        );
        assert!(results[1].is_none());
        assert!(results[2].is_none());
        assert!(!path.join("coord.sock").exists());
    }

    #[test]
    fn test_divergence_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let group = SocketGroup::join(&env(&path, rank, 2), &settings()).unwrap();
                    group.barrier(if rank == 0 { "cell:a" } else { "cell:b" })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(matches!(results[0], Err(CoordinationError::Diverged { .. })));
        assert!(matches!(results[1], Err(CoordinationError::Aborted { .. })));
    }

    #[test]
    fn test_part_frame_carries_raw_bytes() {
        let (mut tx, mut rx) = UnixStream::pair().unwrap();
        let part = vec![0xffu8; 4096];
        write_part(&mut tx, &part, 0).unwrap();
        drop(tx);

        let mut wire = Vec::new();
        rx.read_to_end(&mut wire).unwrap();
        assert_eq!(wire.len(), part.len() + HEADER_LEN);
        assert_eq!(wire[0], KIND_PART);

        let (mut tx, mut rx) = UnixStream::pair().unwrap();
        write_part(&mut tx, &part, 0).unwrap();
        match read_frame(&mut rx, "gather", 1).unwrap() {
            Message::Part(bytes) => assert_eq!(bytes, part),
            other => panic!("expected a part, got {}", other.describe()),
        }
    }

    #[test]
    fn test_oversized_control_frame_is_rejected() {
        let (mut tx, mut rx) = UnixStream::pair().unwrap();
        tx.write_all(&frame_header(KIND_CONTROL, MAX_CONTROL + 1)).unwrap();
        assert!(matches!(
            read_frame(&mut rx, "start", 1),
            Err(CoordinationError::Protocol { .. })
        ));

        let (mut tx, mut rx) = UnixStream::pair().unwrap();
        tx.write_all(&frame_header(7, 0)).unwrap();
        assert!(matches!(
            read_frame(&mut rx, "start", 1),
            Err(CoordinationError::Protocol { .. })
        ));
    }

    #[test]
    fn test_gather_of_a_large_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        // Well past what a length-prefixed JSON byte array could carry.
        let len = 96 * 1024 * 1024;

        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let group = SocketGroup::join(&env(&path, rank, 2), &settings()).unwrap();
                    let part = if rank == 0 { vec![1u8] } else { vec![0xffu8; len] };
                    group.gather(part).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let parts = results[0].as_ref().unwrap();
        assert_eq!(parts[0], vec![1u8]);
        assert_eq!(parts[1].len(), len);
        assert!(parts[1].iter().all(|&b| b == 0xff));
        assert!(results[1].is_none());
    }

    #[test]
    fn test_unreachable_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CoordinationSettings {
            barrier_timeout: None,
            connect_timeout: Duration::from_millis(100),
        };
        let result = SocketGroup::join(&env(dir.path(), 1, 2), &settings);
        assert!(matches!(result, Err(CoordinationError::Unreachable { .. })));
    }
}
