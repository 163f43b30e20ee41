//! Sliding-window rate limiting shared by every remote and store call.
//!
//! [`SlidingWindow`] is the pure admission log: at most `limit` admissions in
//! any trailing `window`. [`RateLimiter`] owns one log inside an actor so
//! concurrent callers are serialized, and [`RateGate`] is the cloneable handle
//! callers await on. The actor only computes *when* a caller may proceed; the
//! caller sleeps on its own task, so no state is locked while waiting.
//! [`RateGate::retry_gate`] charges HTTP retries against the same quota.
use crate::actor::{spawn_actor, Actor, Addr, Context};
use crate::error::IngestError;
use anyhow::Result;
use harvest_http::{GateError, RetryGate};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

const MAILBOX: usize = 1024;

/// Admission log for one trailing window.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    admissions: VecDeque<Instant>,
}

impl SlidingWindow {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            window,
            admissions: VecDeque::with_capacity(limit + 1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admissions currently inside the window (including reserved future ones).
    pub fn len(&self) -> usize {
        self.admissions.len()
    }

    /// Record one admission requested at `now` and return the instant the
    /// caller may proceed.
    ///
    /// Entries at least `window` old are pruned first. Below the limit the
    /// caller proceeds at `now`. At the limit the oldest entry is replaced by
    /// `oldest + window`, which is when that entry leaves the window; the
    /// returned instant is reserved immediately so later callers queue behind
    /// it.
    pub fn admit(&mut self, now: Instant) -> Instant {
        while let Some(&oldest) = self.admissions.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }

        if self.admissions.len() < self.limit {
            self.admissions.push_back(now);
            return now;
        }

        let at = match self.admissions.pop_front() {
            Some(oldest) => (oldest + self.window).max(now),
            None => now,
        };
        self.admissions.push_back(at);
        at
    }
}

#[derive(Debug)]
pub enum RateMsg {
    /// Reserve one admission; the reply carries the instant to proceed at.
    Acquire { reply: oneshot::Sender<RatePermit> },
}

#[derive(Debug, Clone, Copy)]
pub struct RatePermit {
    pub ready_at: Instant,
}

/// Sliding-window limiter as an actor.
pub struct RateLimiter {
    window: SlidingWindow,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            window: SlidingWindow::new(limit, window),
        }
    }
}

#[async_trait::async_trait]
impl Actor for RateLimiter {
    type Msg = RateMsg;

    async fn handle(&mut self, msg: Self::Msg, _ctx: &mut Context<Self>) -> Result<()> {
        match msg {
            RateMsg::Acquire { reply } => {
                let ready_at = self.window.admit(Instant::now());
                // Caller may have given up (cancelled); its slot stays reserved.
                let _ = reply.send(RatePermit { ready_at });
            }
        }
        Ok(())
    }
}

/// Cloneable handle to a running [`RateLimiter`]. Clones share one quota.
#[derive(Clone)]
pub struct RateGate {
    addr: Addr<RateLimiter>,
}

impl RateGate {
    /// Spawn a limiter admitting `limit` operations per `window`. The actor
    /// stops when `cancel` fires or every gate is dropped.
    pub fn spawn(
        limit: usize,
        window: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<Result<()>>) {
        let handle = spawn_actor(RateLimiter::new(limit, window), MAILBOX, cancel);
        (Self { addr: handle.addr }, handle.task)
    }

    /// Hook for the HTTP client: each retry waits for its own admission and
    /// gives up once `cancel` fires.
    pub fn retry_gate(&self, cancel: CancellationToken) -> Arc<dyn RetryGate> {
        Arc::new(GatedRetries {
            gate: self.clone(),
            cancel,
        })
    }

    /// Wait until one more operation is permitted.
    ///
    /// Returns [`IngestError::Cancelled`] if `cancel` fires first and
    /// [`IngestError::LimiterClosed`] if the limiter actor has stopped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let (reply, permit_rx) = oneshot::channel();
        self.addr
            .send(RateMsg::Acquire { reply })
            .await
            .map_err(|_| IngestError::LimiterClosed)?;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            permit = permit_rx => permit.map_err(|_| IngestError::LimiterClosed)?,
        };

        let wait = permit.ready_at.saturating_duration_since(Instant::now());
        if wait.is_zero() {
            return Ok(());
        }
        tracing::info!(wait_ms = wait.as_millis() as u64, "rate.wait");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            _ = sleep_until(permit.ready_at) => Ok(()),
        }
    }
}

struct GatedRetries {
    gate: RateGate,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl RetryGate for GatedRetries {
    async fn before_retry(&self) -> Result<(), GateError> {
        self.gate.acquire(&self.cancel).await?;
        Ok(())
    }
}
