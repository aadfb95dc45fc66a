//! In-memory shuffle service.

use crate::error::{PlanError, PlanResult};
use crate::expr::ShuffleKey;
use crate::local::frame::Frame;
use crate::task::ShuffleService;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
enum SessionState {
    /// Accepting transfers. Buckets are filled in transfer order.
    Open { buckets: Vec<Vec<Frame>> },
    Sealed { buckets: Vec<Vec<Frame>> },
    Cancelled,
}

/// Buffers transferred rows per token and hands out buckets after the barrier.
///
/// A transfer to a sealed or cancelled token starts a fresh session, so a graph
/// can be executed more than once against the same service.
#[derive(Debug, Default)]
pub struct InMemoryShuffleService {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl InMemoryShuffleService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self, token: &str) -> bool {
        self.lock()
            .map(|s| matches!(s.get(token), Some(SessionState::Cancelled)))
            .unwrap_or(false)
    }

    /// Tokens with a live (open or sealed) session.
    pub fn active_tokens(&self) -> HashSet<String> {
        self.lock()
            .map(|s| {
                s.iter()
                    .filter(|(_, st)| !matches!(st, SessionState::Cancelled))
                    .map(|(t, _)| t.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> PlanResult<std::sync::MutexGuard<'_, HashMap<String, SessionState>>> {
        self.sessions
            .lock()
            .map_err(|_| PlanError::Execution("shuffle service lock poisoned".to_string()))
    }
}

impl ShuffleService for InMemoryShuffleService {
    fn transfer(
        &self,
        token: &str,
        input_partition: usize,
        npartitions_out: usize,
        on: &ShuffleKey,
        partition: Frame,
    ) -> PlanResult<()> {
        let split = partition.hash_split(on, npartitions_out)?;
        let mut sessions = self.lock()?;
        let state = sessions
            .entry(token.to_string())
            .or_insert_with(|| SessionState::Open {
                buckets: vec![Vec::new(); npartitions_out],
            });
        if !matches!(state, SessionState::Open { .. }) {
            *state = SessionState::Open {
                buckets: vec![Vec::new(); npartitions_out],
            };
        }
        if let SessionState::Open { buckets } = state {
            if buckets.len() != npartitions_out {
                return Err(PlanError::Execution(format!(
                    "shuffle '{}' expects {} outputs, transfer {} asked for {}",
                    token,
                    buckets.len(),
                    input_partition,
                    npartitions_out
                )));
            }
            for (bucket, rows) in buckets.iter_mut().zip(split) {
                bucket.push(rows);
            }
        }
        Ok(())
    }

    fn barrier(&self, token: &str) -> PlanResult<()> {
        let mut sessions = self.lock()?;
        match sessions.remove(token) {
            Some(SessionState::Open { buckets }) | Some(SessionState::Sealed { buckets }) => {
                sessions.insert(token.to_string(), SessionState::Sealed { buckets });
                Ok(())
            }
            Some(SessionState::Cancelled) => {
                sessions.insert(token.to_string(), SessionState::Cancelled);
                Err(PlanError::Cancelled(token.to_string()))
            }
            // a side with no input partitions never transfers
            None => {
                sessions.insert(
                    token.to_string(),
                    SessionState::Sealed { buckets: Vec::new() },
                );
                Ok(())
            }
        }
    }

    fn unpack(&self, token: &str, output: usize) -> PlanResult<Frame> {
        let sessions = self.lock()?;
        match sessions.get(token) {
            Some(SessionState::Sealed { buckets }) => match buckets.get(output) {
                Some(parts) if !parts.is_empty() => Frame::concat(parts),
                _ => Err(PlanError::Execution(format!(
                    "shuffle '{}' has no rows for output {}",
                    token, output
                ))),
            },
            Some(SessionState::Open { .. }) => Err(PlanError::Execution(format!(
                "shuffle '{}' unpacked before its barrier",
                token
            ))),
            Some(SessionState::Cancelled) => Err(PlanError::Cancelled(token.to_string())),
            None => Err(PlanError::Execution(format!("unknown shuffle '{}'", token))),
        }
    }

    fn cancel(&self, token: &str) {
        if let Ok(mut sessions) = self.lock() {
            debug!("Cancelling shuffle {}", token);
            sessions.insert(token.to_string(), SessionState::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScalarValue;

    fn part(keys: &[i64]) -> Frame {
        let rows = keys.iter().map(|k| vec![ScalarValue::from(*k)]).collect();
        Frame::from_rows(&["k"], rows).unwrap()
    }

    #[test]
    fn test_transfer_barrier_unpack() {
        let service = InMemoryShuffleService::new();
        let on = ShuffleKey::Columns(vec!["k".to_string()]);
        service.transfer("t", 0, 3, &on, part(&[1, 2, 3])).unwrap();
        service.transfer("t", 1, 3, &on, part(&[1, 4])).unwrap();
        assert!(service.unpack("t", 0).is_err());
        service.barrier("t").unwrap();
        let total: usize = (0..3).map(|i| service.unpack("t", i).unwrap().num_rows()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_cancelled_session_refuses_unpack() {
        let service = InMemoryShuffleService::new();
        let on = ShuffleKey::Columns(vec!["k".to_string()]);
        service.transfer("t", 0, 2, &on, part(&[1])).unwrap();
        service.cancel("t");
        assert!(service.is_cancelled("t"));
        assert_eq!(service.barrier("t"), Err(PlanError::Cancelled("t".to_string())));
        assert_eq!(
            service.unpack("t", 0).unwrap_err(),
            PlanError::Cancelled("t".to_string())
        );
        assert!(service.active_tokens().is_empty());
    }
}
