//! Session registry for ceremony rounds.
//!
//! Tracks every session this client initiated, its round state and, once
//! completed, its decoded output. The registry is an owned value shared as
//! [`SharedRegistry`]; later rounds look up earlier outputs here (a sign
//! request needs a completed presign).
//!
//! Cleanup drops terminal sessions once their retention has passed. A
//! completed presign that no sign has used yet is kept until one does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{CeremonyError, CompletionEvent, ObjectId, PresignOutput, SessionHandle, SessionId};

/// How long terminal sessions are kept before cleanup drops them.
pub const SESSION_RETENTION_SECS: u64 = 3600;

/// Interval between cleanup runs (in seconds).
pub const CLEANUP_INTERVAL_SECS: u64 = 60;

/// Round state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundState {
    /// Start transaction executed, session id known.
    Initiated,
    /// Correlator is polling.
    AwaitingCompletion,
    Completed,
    TimedOut,
    Failed { reason: String },
}

impl RoundState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RoundState::Completed | RoundState::TimedOut | RoundState::Failed { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub handle: SessionHandle,
    pub state: RoundState,
    pub created_at: Instant,
    pub updated_at: Instant,
    pub completed_at: Option<Instant>,
    /// Set once a sign has consumed this session's presign.
    pub used_at: Option<Instant>,
    pub output: Option<CompletionEvent>,
}

impl SessionRecord {
    fn new(handle: SessionHandle) -> Self {
        let now = Instant::now();
        Self {
            handle,
            state: RoundState::Initiated,
            created_at: now,
            updated_at: now,
            completed_at: None,
            used_at: None,
            output: None,
        }
    }

    fn completed_presign(&self) -> Option<&PresignOutput> {
        match &self.output {
            Some(CompletionEvent::Presign(output)) if self.state == RoundState::Completed => {
                Some(output)
            }
            _ => None,
        }
    }

    fn holds_unused_presign(&self) -> bool {
        self.used_at.is_none() && self.completed_presign().is_some()
    }

    fn should_retain(&self, retention: Duration) -> bool {
        if self.holds_unused_presign() {
            return true;
        }
        match self.used_at.or(self.completed_at) {
            Some(done) => done.elapsed() < retention,
            None => true,
        }
    }
}

/// Registry errors.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Session {session_id} already exists in state {state:?}")]
    SessionExists {
        session_id: SessionId,
        state: RoundState,
    },

    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: SessionId },

    #[error("Session {session_id} cannot move from {from:?} to {to:?}")]
    InvalidStateTransition {
        session_id: SessionId,
        from: RoundState,
        to: RoundState,
    },
}

impl From<RegistryError> for CeremonyError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::SessionExists { session_id, .. } => {
                CeremonyError::DuplicateSession(session_id.to_string())
            }
            other => CeremonyError::Precondition(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub initiated: usize,
    pub awaiting: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionRecord>,
}

pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a freshly initiated session. Session ids are never reused.
    pub fn register(&mut self, handle: SessionHandle) -> Result<(), RegistryError> {
        if let Some(existing) = self.sessions.get(&handle.session_id) {
            warn!(
                session_id = %handle.session_id,
                state = ?existing.state,
                "Session id already registered"
            );
            return Err(RegistryError::SessionExists {
                session_id: handle.session_id,
                state: existing.state.clone(),
            });
        }

        debug!(session_id = %handle.session_id, round = %handle.round, "Registered session");
        self.sessions
            .insert(handle.session_id.clone(), SessionRecord::new(handle));
        Ok(())
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&SessionRecord> {
        self.sessions.get(session_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    fn transition(
        &mut self,
        session_id: &SessionId,
        to: RoundState,
        allowed_from: &[RoundState],
    ) -> Result<&mut SessionRecord, RegistryError> {
        let record =
            self.sessions
                .get_mut(session_id)
                .ok_or_else(|| RegistryError::SessionNotFound {
                    session_id: session_id.clone(),
                })?;

        if !allowed_from.contains(&record.state) {
            return Err(RegistryError::InvalidStateTransition {
                session_id: session_id.clone(),
                from: record.state.clone(),
                to,
            });
        }

        let now = Instant::now();
        if to.is_terminal() {
            record.completed_at = Some(now);
        }
        record.state = to;
        record.updated_at = now;
        Ok(record)
    }

    pub fn mark_awaiting(&mut self, session_id: &SessionId) -> Result<(), RegistryError> {
        self.transition(
            session_id,
            RoundState::AwaitingCompletion,
            &[RoundState::Initiated],
        )?;
        Ok(())
    }

    /// Store the decoded completion event for a session.
    pub fn complete(
        &mut self,
        session_id: &SessionId,
        output: CompletionEvent,
    ) -> Result<(), RegistryError> {
        let record = self.transition(
            session_id,
            RoundState::Completed,
            &[RoundState::Initiated, RoundState::AwaitingCompletion],
        )?;
        record.output = Some(output);
        info!(session_id = %session_id, "Session completed");
        Ok(())
    }

    pub fn time_out(&mut self, session_id: &SessionId) -> Result<(), RegistryError> {
        self.transition(
            session_id,
            RoundState::TimedOut,
            &[RoundState::Initiated, RoundState::AwaitingCompletion],
        )?;
        warn!(session_id = %session_id, "Session timed out");
        Ok(())
    }

    pub fn fail(&mut self, session_id: &SessionId, reason: String) -> Result<(), RegistryError> {
        self.transition(
            session_id,
            RoundState::Failed { reason },
            &[RoundState::Initiated, RoundState::AwaitingCompletion],
        )?;
        warn!(session_id = %session_id, "Session failed");
        Ok(())
    }

    /// Output of the completed, not yet used presign session that produced
    /// `presign_id`.
    pub fn completed_presign(&self, presign_id: &ObjectId) -> Option<&PresignOutput> {
        self.sessions
            .values()
            .filter(|record| record.used_at.is_none())
            .filter_map(SessionRecord::completed_presign)
            .find(|output| &output.presign_id == presign_id)
    }

    /// Record that a sign consumed `presign_id`. Its session becomes
    /// eligible for cleanup from now on.
    pub fn mark_presign_used(&mut self, presign_id: &ObjectId) -> bool {
        let record = self.sessions.values_mut().find(|record| {
            record.used_at.is_none()
                && record
                    .completed_presign()
                    .is_some_and(|output| &output.presign_id == presign_id)
        });
        match record {
            Some(record) => {
                let now = Instant::now();
                record.used_at = Some(now);
                record.updated_at = now;
                debug!(session_id = %record.handle.session_id, presign_id = %presign_id, "Presign used");
                true
            }
            None => false,
        }
    }

    /// Drop terminal sessions older than `retention`, keeping unused
    /// presigns.
    pub fn cleanup(&mut self, retention: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|id, record| {
            let retain = record.should_retain(retention);
            if !retain {
                debug!(session_id = %id, "Removing expired session");
            }
            retain
        });

        let removed = before - self.sessions.len();
        if removed > 0 {
            info!("Cleanup: removed {} sessions", removed);
        }
        removed
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for record in self.sessions.values() {
            match record.state {
                RoundState::Initiated => stats.initiated += 1,
                RoundState::AwaitingCompletion => stats.awaiting += 1,
                RoundState::Completed => stats.completed += 1,
                RoundState::TimedOut => stats.timed_out += 1,
                RoundState::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }
}

/// Periodically drop expired sessions from `registry`.
pub fn spawn_cleanup_task(registry: SharedRegistry) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            registry
                .write()
                .await
                .cleanup(Duration::from_secs(SESSION_RETENTION_SECS));
        }
    })
}
