// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-process communicator: one thread per simulated rank.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::Communicator;
use crate::error::CoordinationError;

const GATHER_TAG: &str = "\u{0}gather";
const GATHER_DONE_TAG: &str = "\u{0}gather-done";

#[derive(Debug, Default)]
struct GroupState {
    generation: u64,
    arrived: usize,
    /// Tag of the first arrival in the current generation.
    tag: Option<String>,
    /// Set once the group is unusable; every later call fails.
    broken: Option<String>,
    parts: Vec<Option<Vec<u8>>>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    timeout: Option<Duration>,
    state: Mutex<GroupState>,
    turnstile: Condvar,
}

/// Factory for a group of in-process communicators.
pub struct LocalGroup;

impl LocalGroup {
    /// One communicator per rank, ordered by rank.
    pub fn new(size: usize, barrier_timeout: Option<Duration>) -> Vec<LocalComm> {
        let shared = Arc::new(Shared {
            size,
            timeout: barrier_timeout,
            state: Mutex::new(GroupState {
                parts: vec![None; size],
                ..GroupState::default()
            }),
            turnstile: Condvar::new(),
        });

        (0..size)
            .map(|rank| LocalComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// Communicator endpoint of one simulated rank.
#[derive(Debug)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalComm {
    fn lock(&self) -> Result<MutexGuard<'_, GroupState>, CoordinationError> {
        self.shared.state.lock().map_err(|_| CoordinationError::Aborted {
            reason: "a rank panicked while holding the group lock".to_string(),
        })
    }

    fn fail(&self, state: &mut GroupState, reason: String) {
        state.broken.get_or_insert(reason);
        self.shared.turnstile.notify_all();
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self, tag: &str) -> Result<(), CoordinationError> {
        let mut state = self.lock()?;

        if let Some(reason) = &state.broken {
            return Err(CoordinationError::Aborted {
                reason: reason.clone(),
            });
        }

        match state.tag.clone() {
            Some(expected) if expected != tag => {
                let err = CoordinationError::Diverged {
                    rank: self.rank,
                    expected,
                    actual: tag.to_string(),
                };
                self.fail(&mut state, err.to_string());
                return Err(err);
            }
            Some(_) => {}
            None => state.tag = Some(tag.to_string()),
        }

        state.arrived += 1;
        if state.arrived == self.shared.size {
            state.arrived = 0;
            state.tag = None;
            state.generation += 1;
            self.shared.turnstile.notify_all();
            return Ok(());
        }

        let generation = state.generation;
        let started = Instant::now();

        while state.generation == generation && state.broken.is_none() {
            state = match self.shared.timeout {
                None => self
                    .shared
                    .turnstile
                    .wait(state)
                    .map_err(|_| CoordinationError::Aborted {
                        reason: "group lock poisoned".to_string(),
                    })?,
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        let err = CoordinationError::Timeout {
                            tag: tag.to_string(),
                            waited_ms: elapsed.as_millis() as u64,
                        };
                        self.fail(&mut state, err.to_string());
                        return Err(err);
                    }
                    self.shared
                        .turnstile
                        .wait_timeout(state, limit - elapsed)
                        .map_err(|_| CoordinationError::Aborted {
                            reason: "group lock poisoned".to_string(),
                        })?
                        .0
                }
            };
        }

        if state.generation == generation {
            let reason = state.broken.clone().unwrap_or_default();
            return Err(CoordinationError::Aborted { reason });
        }
        Ok(())
    }

    fn gather(&self, part: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CoordinationError> {
        self.lock()?.parts[self.rank] = Some(part);
        self.barrier(GATHER_TAG)?;

        let collected = if self.rank == 0 {
            let mut state = self.lock()?;
            let parts = state
                .parts
                .iter_mut()
                .enumerate()
                .map(|(rank, slot)| {
                    slot.take().ok_or_else(|| CoordinationError::Protocol {
                        reason: format!("rank {} deposited no part", rank),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Some(parts)
        } else {
            None
        };

        // Nobody may deposit the next round before rank 0 collected this one.
        self.barrier(GATHER_DONE_TAG)?;
        Ok(collected)
    }

    fn abort(&self, reason: &str) {
        if let Ok(mut state) = self.shared.state.lock() {
            self.fail(&mut state, format!("rank {}: {}", self.rank, reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_barrier_releases_all() {
        let comms = LocalGroup::new(4, None);
        let passed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let passed = Arc::clone(&passed);
                std::thread::spawn(move || {
                    for round in 0..10 {
                        comm.barrier(&format!("round:{}", round)).unwrap();
                    }
                    passed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(passed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_divergent_tags_abort_everyone() {
        let comms = LocalGroup::new(3, None);

        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let tag = if comm.rank() == 2 { "cell:b" } else { "cell:a" };
                    comm.barrier(tag)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| r.is_err()));
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(CoordinationError::Diverged { .. }))));
    }

    #[test]
    fn test_barrier_timeout() {
        let comms = LocalGroup::new(2, Some(Duration::from_millis(50)));
        let result = comms[0].barrier("lonely");
        assert!(matches!(result, Err(CoordinationError::Timeout { .. })));
        // the group stays broken
        assert!(matches!(
            comms[1].barrier("lonely"),
            Err(CoordinationError::Aborted { .. })
        ));
    }

    #[test]
    fn test_gather_in_rank_order() {
        let comms = LocalGroup::new(3, None);

        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let mut rounds = Vec::new();
                    for round in 0..3u8 {
                        rounds.push(comm.gather(vec![comm.rank() as u8, round]).unwrap());
                    }
                    (comm.rank(), rounds)
                })
            })
            .collect();

        for handle in handles {
            let (rank, rounds) = handle.join().unwrap();
            for (round, gathered) in rounds.into_iter().enumerate() {
                if rank == 0 {
                    let parts = gathered.unwrap();
                    let expected: Vec<Vec<u8>> =
                        (0..3u8).map(|r| vec![r, round as u8]).collect();
                    assert_eq!(parts, expected);
                } else {
                    assert!(gathered.is_none());
                }
            }
        }
    }
}
