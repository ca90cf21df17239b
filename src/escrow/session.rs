//! Session lifecycle
//!
//! `initiated -> active -> completed -> paid`, strictly forward. A trigger
//! that does not apply to the current state leaves the session untouched
//! and reports the state it is in, so redundant attest or claim calls are
//! safe to repeat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default session length when the request does not name one
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    Active,
    Completed,
    Paid,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Paid => "paid",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == SessionStatus::Paid
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to open a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub learner_id: String,
    pub provider_id: String,
    pub skill: String,
    pub budget_lovelace: u64,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

impl NewSession {
    /// First problem with the request, if any
    pub fn validate(&self) -> Result<(), String> {
        if self.learner_id.trim().is_empty() {
            return Err("learner_id is required".to_string());
        }
        if self.provider_id.trim().is_empty() {
            return Err("provider_id is required".to_string());
        }
        if self.skill.trim().is_empty() {
            return Err("skill is required".to_string());
        }
        if self.budget_lovelace == 0 {
            return Err("budget must be positive".to_string());
        }
        if self.duration_minutes == Some(0) {
            return Err("duration must be positive".to_string());
        }
        Ok(())
    }
}

/// A mentoring session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub learner_id: String,
    pub provider_id: String,
    pub skill: String,
    pub budget_lovelace: u64,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Open a session in `initiated`. Call [`NewSession::validate`] first.
    pub fn create(request: NewSession) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            learner_id: request.learner_id,
            provider_id: request.provider_id,
            skill: request.skill,
            budget_lovelace: request.budget_lovelace,
            duration_minutes: request
                .duration_minutes
                .unwrap_or(DEFAULT_DURATION_MINUTES),
            status: SessionStatus::Initiated,
            created_at: now,
            updated_at: now,
        }
    }

    fn advance(&mut self, from: &[SessionStatus], to: SessionStatus) -> SessionStatus {
        if from.contains(&self.status) && self.status != to {
            self.status = to;
            self.updated_at = Utc::now();
        }
        self.status
    }

    /// Escrow output observed on chain
    pub fn on_escrow_locked(&mut self) -> SessionStatus {
        self.advance(
            &[SessionStatus::Initiated, SessionStatus::Active],
            SessionStatus::Active,
        )
    }

    /// Both parties attested in the on-chain datum
    pub fn on_dual_attestation(&mut self) -> SessionStatus {
        self.advance(&[SessionStatus::Active], SessionStatus::Completed)
    }

    /// Claim settled the escrow
    pub fn on_settlement(&mut self) -> SessionStatus {
        self.advance(&[SessionStatus::Completed], SessionStatus::Paid)
    }
}
