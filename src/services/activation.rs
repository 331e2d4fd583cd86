use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::CurrentUser;
use crate::services::identity::IdentityService;
use crate::services::mailer::Mailer;
use crate::services::otp::{OtpService, OTP_CODE_LEN};

/// Sessions idle longer than this are dropped by the sweeper.
const IDLE_EVICTION_SECS: i64 = 3600;

/// Position of an account in the activation handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// No signed-in identity; activation cannot proceed.
    AwaitingEmail,
    /// A challenge is live and the countdown is running.
    Counting,
    /// The countdown reached zero; only a resend can continue the flow.
    Expired,
    /// A submission is in flight; further submissions are turned away.
    Verifying,
    /// The account is verified.
    Activated,
}

/// Entry context for the flow: the identity resolved once, up front.
#[derive(Debug, Clone, Default)]
pub struct ActivationContext {
    pub identity: Option<CurrentUser>,
}

impl ActivationContext {
    pub fn anonymous() -> Self {
        Self { identity: None }
    }

    pub fn authenticated(user: CurrentUser) -> Self {
        Self { identity: Some(user) }
    }
}

/// Status body returned by the activation endpoints.
#[derive(Debug, Serialize)]
pub struct ActivationStatus {
    pub state: ActivationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub remaining_secs: u64,
    pub can_submit: bool,
    pub can_resend: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

impl ActivationStatus {
    fn awaiting_email() -> Self {
        Self {
            state: ActivationState::AwaitingEmail,
            email: None,
            remaining_secs: 0,
            can_submit: false,
            can_resend: false,
            redirect_to: Some("/register".to_string()),
        }
    }

    fn activated(email: Option<String>) -> Self {
        Self {
            state: ActivationState::Activated,
            email,
            remaining_secs: 0,
            can_submit: false,
            can_resend: false,
            redirect_to: Some("/home".to_string()),
        }
    }
}

/// Point-in-time view of one activation session.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub email: String,
    pub deadline: DateTime<Utc>,
    pub verifying: bool,
}

impl SessionView {
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.deadline - now).num_seconds().max(0) as u64
    }
}

#[derive(Debug)]
struct SessionEntry {
    email: String,
    deadline: DateTime<Utc>,
    verifying: bool,
    expiry_logged: bool,
    touched_at: DateTime<Utc>,
}

/// Counters returned by one sweep pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub newly_expired: usize,
    pub evicted: usize,
}

/// In-process activation sessions, keyed by account id.
///
/// The countdown is not a timer per session: each entry stores the challenge
/// deadline and the remaining time is derived on read, so the counter and the
/// challenge share one clock. The mutex is never held across an await.
#[derive(Default)]
pub struct ActivationSessions {
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl ActivationSessions {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record the registration hand-off with the challenge deadline.
    pub fn establish(&self, account_id: &str, email: &str, expires_at: &str) -> SessionView {
        self.establish_at(account_id, email, parse_deadline(expires_at))
    }

    /// Record a session with an explicit deadline. A deadline in the past
    /// enters the flow directly in the expired position.
    pub fn establish_at(
        &self,
        account_id: &str,
        email: &str,
        deadline: DateTime<Utc>,
    ) -> SessionView {
        let now = Utc::now();
        self.entries().insert(
            account_id.to_string(),
            SessionEntry {
                email: email.to_string(),
                deadline,
                verifying: false,
                expiry_logged: deadline <= now,
                touched_at: now,
            },
        );

        SessionView {
            email: email.to_string(),
            deadline,
            verifying: false,
        }
    }

    pub fn snapshot(&self, account_id: &str) -> Option<SessionView> {
        let mut entries = self.entries();
        let entry = entries.get_mut(account_id)?;
        entry.touched_at = Utc::now();

        Some(SessionView {
            email: entry.email.clone(),
            deadline: entry.deadline,
            verifying: entry.verifying,
        })
    }

    /// Fresh challenge, fresh countdown.
    pub fn reset_deadline(&self, account_id: &str, expires_at: &str) {
        let deadline = parse_deadline(expires_at);
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(account_id) {
            entry.deadline = deadline;
            entry.expiry_logged = false;
            entry.touched_at = Utc::now();
        }
    }

    /// Single-flight gate: true when this caller took the verifying slot.
    pub fn begin_verify(&self, account_id: &str) -> bool {
        let mut entries = self.entries();
        match entries.get_mut(account_id) {
            Some(entry) if !entry.verifying => {
                entry.verifying = true;
                entry.touched_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn finish_verify(&self, account_id: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(account_id) {
            entry.verifying = false;
            entry.touched_at = Utc::now();
        }
    }

    pub fn remove(&self, account_id: &str) {
        self.entries().remove(account_id);
    }

    /// One sweep pass: log countdowns that crossed their deadline since the
    /// last pass and drop sessions idle past the eviction window.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let mut entries = self.entries();
        let mut stats = SweepStats::default();

        entries.retain(|_, entry| {
            if (now - entry.touched_at).num_seconds() > IDLE_EVICTION_SECS {
                stats.evicted += 1;
                return false;
            }
            if now >= entry.deadline && !entry.expiry_logged {
                entry.expiry_logged = true;
                stats.newly_expired += 1;
                tracing::debug!("Activation countdown expired for {}", entry.email);
            }
            true
        });

        if stats.evicted > 0 {
            tracing::debug!("Evicted {} idle activation sessions", stats.evicted);
        }

        stats
    }

    /// 1 Hz sweep loop. The caller keeps the handle and aborts it at
    /// shutdown.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                self.sweep(Utc::now());
            }
        })
    }
}

fn parse_deadline(expires_at: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(expires_at)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// The activation state machine, driven per request.
///
/// `AwaitingEmail → Counting → Expired → (resend) → Counting` and
/// `Counting → Verifying → Activated`, with failure edges back to
/// `Counting`/`Expired` depending on the deadline at response time.
pub struct ActivationFlow<'a> {
    ctx: ActivationContext,
    db: &'a Database,
    config: &'a Config,
    mailer: &'a dyn Mailer,
    sessions: &'a ActivationSessions,
}

impl<'a> ActivationFlow<'a> {
    pub fn new(
        ctx: ActivationContext,
        db: &'a Database,
        config: &'a Config,
        mailer: &'a dyn Mailer,
        sessions: &'a ActivationSessions,
    ) -> Self {
        Self { ctx, db, config, mailer, sessions }
    }

    /// Land on the activation screen: resolve the target email and present
    /// the current position in the handshake.
    pub async fn enter(&self) -> Result<ActivationStatus> {
        let Some(identity) = &self.ctx.identity else {
            return Ok(ActivationStatus::awaiting_email());
        };

        let account = IdentityService::get_account(self.db, &identity.id).await?;
        if account.email_verified {
            self.sessions.remove(&identity.id);
            return Ok(ActivationStatus::activated(Some(account.email)));
        }
        if account.registration_incomplete {
            tracing::debug!("Account {} has no dispatched OTP yet", account.email);
        }

        let view = self.ensure_session(identity, &account.email).await?;
        Ok(self.present(&view))
    }

    /// Submit a code. Only legal while the countdown runs; exactly one
    /// submission may be in flight per account.
    pub async fn submit(&self, code: &str) -> Result<ActivationStatus> {
        // Shape first, before touching identity or storage.
        if code.len() != OTP_CODE_LEN {
            return Err(AppError::BadRequest("OTP must be exactly 6 digits".to_string()));
        }
        if !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::BadRequest("OTP must contain only digits".to_string()));
        }

        let Some(identity) = &self.ctx.identity else {
            return Err(AppError::Unauthorized(
                "No user logged in. Please register again.".to_string(),
            ));
        };

        let account = IdentityService::get_account(self.db, &identity.id).await?;
        if account.email_verified {
            self.sessions.remove(&identity.id);
            return Ok(ActivationStatus::activated(Some(account.email)));
        }

        let view = self.ensure_session(identity, &account.email).await?;
        if view.remaining_secs(Utc::now()) == 0 {
            return Err(AppError::BadRequest("OTP has expired. Please resend OTP.".to_string()));
        }

        if !self.sessions.begin_verify(&identity.id) {
            return Err(AppError::Conflict(
                "Verification already in progress. Please wait.".to_string(),
            ));
        }

        let outcome = OtpService::verify(self.db, &account.email, code).await;
        self.sessions.finish_verify(&identity.id);

        match outcome {
            Ok(()) => {
                IdentityService::mark_email_verified(self.db, &identity.id).await?;
                self.sessions.remove(&identity.id);
                tracing::info!("Account {} activated", account.email);
                Ok(ActivationStatus::activated(Some(account.email)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Issue a replacement challenge. Only legal once the countdown has
    /// expired; the deadline resets to the full window on success.
    pub async fn resend(&self) -> Result<ActivationStatus> {
        let Some(identity) = &self.ctx.identity else {
            return Err(AppError::Unauthorized(
                "No user logged in. Please register again.".to_string(),
            ));
        };

        let account = IdentityService::get_account(self.db, &identity.id).await?;
        if account.email_verified {
            self.sessions.remove(&identity.id);
            return Ok(ActivationStatus::activated(Some(account.email)));
        }

        let view = self.ensure_session(identity, &account.email).await?;
        if view.remaining_secs(Utc::now()) > 0 {
            return Err(AppError::BadRequest("Current OTP has not expired yet.".to_string()));
        }

        let challenge = OtpService::issue(self.db, self.config, self.mailer, &account.email).await?;
        self.sessions.reset_deadline(&identity.id, &challenge.expires_at);

        let view = self
            .sessions
            .snapshot(&identity.id)
            .unwrap_or_else(|| SessionView {
                email: account.email.clone(),
                deadline: parse_deadline(&challenge.expires_at),
                verifying: false,
            });
        Ok(self.present(&view))
    }

    /// Re-derive a session when the hand-off was lost (service restart,
    /// eviction, or a registration whose dispatch failed): an active
    /// challenge donates its deadline, otherwise the flow enters expired.
    async fn ensure_session(
        &self,
        identity: &CurrentUser,
        email: &str,
    ) -> Result<SessionView> {
        if let Some(view) = self.sessions.snapshot(&identity.id) {
            return Ok(view);
        }

        let deadline = match OtpService::active_challenge(self.db, email).await? {
            Some(challenge) => parse_deadline(&challenge.expires_at),
            None => Utc::now(),
        };

        Ok(self.sessions.establish_at(&identity.id, email, deadline))
    }

    fn present(&self, view: &SessionView) -> ActivationStatus {
        let remaining = view.remaining_secs(Utc::now());
        let state = if view.verifying {
            ActivationState::Verifying
        } else if remaining == 0 {
            ActivationState::Expired
        } else {
            ActivationState::Counting
        };

        ActivationStatus {
            state,
            email: Some(view.email.clone()),
            remaining_secs: remaining,
            can_submit: state == ActivationState::Counting,
            can_resend: state == ActivationState::Expired,
            redirect_to: None,
        }
    }
}
