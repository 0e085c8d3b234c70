//! Order note attribute to metafield processing pipeline.
//!
//! # Flow
//!
//! ```text
//! webhook ─► verify HMAC ─► duplicate? ─► parse ─► process_order
//!
//! process_order:
//!   extract attributes ─► nothing known ──────────────────────► Skipped
//!          │          └─► only invalid ─► DLQ, Failed ────────► Invalid
//!          ▼
//!   fingerprint == completed fingerprint ─────────────────────► AlreadyProcessed
//!          ▼
//!   circuit open ─► retry queue, Retrying ────────────────────► RetryScheduled
//!          ▼
//!   Processing, attempts += 1 ─► token ─► upsert metafields
//!          │                        │          │
//!          │                  missing token    ├─ ok ─► Completed
//!          │                        ▼          └─ err ─► classify
//!          │                       DLQ                 ├─ retryable, attempts < max ─► RetryScheduled
//!          │                                           └─ otherwise ─► DLQ, Failed ─► DeadLettered
//! ```
//!
//! Status records, retry jobs and dead letters are JSON in KV; see
//! [`crate::kv`] for the key layout.

use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use delivery_dates_core::{ErrorCategory, ErrorSeverity, OrderId, ProcessingStatus, ShopDomain};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::attributes::{self, AttributeError};
use super::error_handling::{ClassifiedError, classify};
use super::{ErrorHandlingService, MetafieldService, PipelineError, TokenStore, UpsertOutcome};
use crate::config::PipelineConfig;
use crate::kv::{self, KvError, KvStore, SharedKv, keys};
use crate::shopify::MetafieldValue;
use crate::shopify::webhook::{
    NoteAttribute, OrderWebhookPayload, WebhookError, WebhookHeaders, verify_webhook_hmac,
};

/// How long a webhook delivery id is remembered.
pub const DUPLICATE_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// Most keys scanned per prefix by sweeps and stats.
const MAX_SCAN: usize = 10_000;

// =============================================================================
// Records
// =============================================================================

/// What triggered a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Webhook,
    Direct,
    Retry,
    Replay,
}

/// An order to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderJob {
    pub shop: ShopDomain,
    pub order_id: OrderId,
    pub order_name: Option<String>,
    pub attributes: Vec<NoteAttribute>,
    pub source: JobSource,
    pub topic: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl OrderJob {
    #[must_use]
    pub fn from_webhook(headers: &WebhookHeaders, payload: OrderWebhookPayload) -> Self {
        Self {
            shop: headers.shop.clone(),
            order_id: payload.id,
            order_name: payload.name,
            attributes: payload.note_attributes,
            source: JobSource::Webhook,
            topic: Some(headers.topic.clone()),
            received_at: Utc::now(),
        }
    }

    /// A job for a value submitted directly (not via webhook).
    #[must_use]
    pub fn direct(shop: ShopDomain, order_id: OrderId, attributes: Vec<NoteAttribute>) -> Self {
        Self {
            shop,
            order_id,
            order_name: None,
            attributes,
            source: JobSource::Direct,
            topic: None,
            received_at: Utc::now(),
        }
    }

    const fn with_source(mut self, source: JobSource) -> Self {
        self.source = source;
        self
    }
}

/// Per-order processing status (`order_status:{shop}:{order_id}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub shop: ShopDomain,
    pub order_id: OrderId,
    pub order_name: Option<String>,
    pub status: ProcessingStatus,
    pub attempts: u32,
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub metafields: Vec<MetafieldValue>,
    pub last_error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusRecord {
    fn new(job: &OrderJob, now: DateTime<Utc>) -> Self {
        Self {
            shop: job.shop.clone(),
            order_id: job.order_id,
            order_name: job.order_name.clone(),
            status: ProcessingStatus::Queued,
            attempts: 0,
            fingerprint: None,
            metafields: Vec::new(),
            last_error: None,
            error_category: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = ProcessingStatus::Processing;
        self.attempts += 1;
        self.next_retry_at = None;
        self.updated_at = now;
    }

    fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = ProcessingStatus::Completed;
        self.last_error = None;
        self.error_category = None;
        self.next_retry_at = None;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    fn mark_retrying(&mut self, err: &ClassifiedError, next: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = ProcessingStatus::Retrying;
        self.last_error = Some(err.message.clone());
        self.error_category = Some(err.category);
        self.next_retry_at = Some(next);
        self.updated_at = now;
    }

    fn mark_failed(&mut self, err: &ClassifiedError, now: DateTime<Utc>) {
        self.status = ProcessingStatus::Failed;
        self.last_error = Some(err.message.clone());
        self.error_category = Some(err.category);
        self.next_retry_at = None;
        self.updated_at = now;
    }
}

/// A scheduled retry (`retry:{shop}:{order_id}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryJob {
    pub job: OrderJob,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub reason: String,
    pub category: ErrorCategory,
}

/// An order that will not be retried automatically (`dlq:{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: String,
    pub job: OrderJob,
    pub error: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of webhook intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "webhook", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// This delivery was already handled.
    Duplicate,
    Processed(ProcessOutcome),
}

/// Result of processing one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// No delivery attributes on the order.
    Skipped,
    /// Delivery attributes were present but none were valid.
    Invalid {
        errors: Vec<AttributeError>,
        dead_letter_id: String,
    },
    /// The same values were already written.
    AlreadyProcessed,
    Completed { result: UpsertOutcome },
    RetryScheduled {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        category: ErrorCategory,
    },
    DeadLettered {
        dead_letter_id: String,
        category: ErrorCategory,
    },
}

/// Counts from one retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySweep {
    pub processed: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

/// Snapshot of pipeline state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub retry_queue: usize,
    pub dead_letters: usize,
}

impl PipelineStats {
    fn count(&mut self, status: ProcessingStatus) {
        match status {
            ProcessingStatus::Queued => self.queued += 1,
            ProcessingStatus::Processing => self.processing += 1,
            ProcessingStatus::Completed => self.completed += 1,
            ProcessingStatus::Failed => self.failed += 1,
            ProcessingStatus::Retrying => self.retrying += 1,
        }
    }
}

/// Backoff before retry number `attempts`: `min(base * 2^(attempts-1), max)`.
#[must_use]
pub fn retry_delay(config: &PipelineConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1);
    2u32.checked_pow(exponent)
        .and_then(|factor| config.base_retry_delay.checked_mul(factor))
        .map_or(config.max_retry_delay, |delay| delay.min(config.max_retry_delay))
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_chrono(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// =============================================================================
// Pipeline
// =============================================================================

/// The order processing pipeline.
#[derive(Clone)]
pub struct Pipeline {
    kv: SharedKv,
    tokens: TokenStore,
    metafields: MetafieldService,
    errors: ErrorHandlingService,
    config: PipelineConfig,
    webhook_secret: SecretString,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("metafields", &self.metafields)
            .field("config", &self.config)
            .field("webhook_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(
        kv: SharedKv,
        tokens: TokenStore,
        metafields: MetafieldService,
        errors: ErrorHandlingService,
        config: PipelineConfig,
        webhook_secret: SecretString,
    ) -> Self {
        Self {
            kv,
            tokens,
            metafields,
            errors,
            config,
            webhook_secret,
        }
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    #[must_use]
    pub const fn errors(&self) -> &ErrorHandlingService {
        &self.errors
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // =========================================================================
    // Webhook intake
    // =========================================================================

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookHeaders, PipelineError> {
        let webhook = WebhookHeaders::from_headers(headers)?;
        if !verify_webhook_hmac(body, &webhook.hmac, self.webhook_secret.expose_secret()) {
            tracing::warn!(shop = %webhook.shop, topic = %webhook.topic, "Invalid webhook HMAC");
            return Err(WebhookError::InvalidSignature.into());
        }
        Ok(webhook)
    }

    /// Handle an `orders/create` or `orders/updated` delivery.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Webhook` for bad headers, signature or body,
    /// and `PipelineError::Kv` if state cannot be read or written.
    #[instrument(skip_all)]
    pub async fn handle_order_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookOutcome, PipelineError> {
        let webhook = self.verify(headers, body)?;
        let marker = keys::webhook(&webhook.dedupe_id(body));

        if self.kv.get(&marker).await?.is_some() {
            tracing::info!(shop = %webhook.shop, topic = %webhook.topic, "Duplicate webhook ignored");
            return Ok(WebhookOutcome::Duplicate);
        }

        let payload = OrderWebhookPayload::from_slice(body)?;
        let job = OrderJob::from_webhook(&webhook, payload);
        let outcome = self.process_order(job).await?;

        self.kv
            .put(&marker, Utc::now().to_rfc3339(), Some(DUPLICATE_TTL))
            .await?;

        Ok(WebhookOutcome::Processed(outcome))
    }

    /// Handle `app/uninstalled`: forget the shop's token and breaker.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Webhook` for bad headers or signature.
    #[instrument(skip_all)]
    pub async fn handle_app_uninstalled(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<bool, PipelineError> {
        let webhook = self.verify(headers, body)?;
        let removed = self.tokens.delete(&webhook.shop).await?;
        self.errors.reset(&webhook.shop).await?;
        tracing::info!(shop = %webhook.shop, removed, "App uninstalled");
        Ok(removed)
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Process one order.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Kv` if state cannot be read or written. All
    /// other failures are recorded and reported through the outcome.
    #[instrument(skip(self, job), fields(shop = %job.shop, order_id = %job.order_id, source = ?job.source))]
    pub async fn process_order(&self, job: OrderJob) -> Result<ProcessOutcome, PipelineError> {
        let transform = attributes::extract(&job.attributes);
        if transform.is_empty() {
            tracing::debug!("No delivery attributes on order");
            return Ok(ProcessOutcome::Skipped);
        }

        let now = Utc::now();
        let mut record = self
            .order_status(&job.shop, job.order_id)
            .await?
            .unwrap_or_else(|| StatusRecord::new(&job, now));
        if job.order_name.is_some() {
            record.order_name.clone_from(&job.order_name);
        }

        if transform.is_invalid() {
            let err = classify(&PipelineError::Validation(transform.error_summary()));
            self.errors
                .log_error(Some(&job.shop), Some(job.order_id), &err)
                .await?;
            let dead_letter_id = self.dead_letter(&job, &err, record.attempts).await?;
            record.mark_failed(&err, now);
            self.save_status(&record).await?;
            return Ok(ProcessOutcome::Invalid {
                errors: transform.errors,
                dead_letter_id,
            });
        }

        if !transform.errors.is_empty() {
            tracing::warn!(errors = %transform.error_summary(), "Ignoring invalid delivery attributes");
        }

        let fingerprint = attributes::fingerprint(&transform.metafields);
        if record.fingerprint.as_deref() == Some(fingerprint.as_str())
            && record.status == ProcessingStatus::Completed
        {
            tracing::debug!("Delivery metafields already written");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        // Only scheduled retries continue an earlier run's attempt count
        if job.source != JobSource::Retry || record.fingerprint.as_deref() != Some(fingerprint.as_str()) {
            record.attempts = 0;
        }
        record.fingerprint = Some(fingerprint);
        record.metafields = transform.metafields;

        let decision = self.errors.check(&job.shop).await?;
        if !decision.allowed {
            let err = classify(&PipelineError::CircuitOpen(job.shop.clone()));
            let delay = decision.retry_after.unwrap_or(self.config.base_retry_delay);
            let next = after(now, delay);
            self.schedule_retry(&job, record.attempts, next, &err).await?;
            record.mark_retrying(&err, next, now);
            self.save_status(&record).await?;
            tracing::info!(next_retry_at = %next, "Circuit open, order deferred");
            return Ok(ProcessOutcome::RetryScheduled {
                attempts: record.attempts,
                next_retry_at: next,
                category: err.category,
            });
        }

        record.mark_processing(now);
        self.save_status(&record).await?;

        let Some(token) = self.tokens.get(&job.shop).await? else {
            let err = classify(&PipelineError::MissingToken(job.shop.clone()));
            return self.fail(&job, record, err).await;
        };

        match self
            .metafields
            .upsert(&job.shop, &token.access_token, job.order_id, &record.metafields)
            .await
        {
            Ok(result) => {
                self.errors.record_success(&job.shop).await?;
                self.kv.delete(&keys::retry(&job.shop, job.order_id)).await?;
                record.mark_completed(Utc::now());
                self.save_status(&record).await?;
                Ok(ProcessOutcome::Completed { result })
            }
            Err(e) => {
                let err = classify(&PipelineError::Shopify(e));
                self.errors.record_failure(&job.shop, &err).await?;
                self.fail(&job, record, err).await
            }
        }
    }

    /// Retry or dead-letter a failed attempt.
    async fn fail(
        &self,
        job: &OrderJob,
        mut record: StatusRecord,
        err: ClassifiedError,
    ) -> Result<ProcessOutcome, PipelineError> {
        let now = Utc::now();
        self.errors
            .log_error(Some(&job.shop), Some(job.order_id), &err)
            .await?;

        if err.retryable && record.attempts < self.config.max_attempts {
            let next = after(now, retry_delay(&self.config, record.attempts));
            self.schedule_retry(job, record.attempts, next, &err).await?;
            record.mark_retrying(&err, next, now);
            self.save_status(&record).await?;
            tracing::info!(
                attempts = record.attempts,
                next_retry_at = %next,
                category = %err.category,
                "Order retry scheduled"
            );
            return Ok(ProcessOutcome::RetryScheduled {
                attempts: record.attempts,
                next_retry_at: next,
                category: err.category,
            });
        }

        let dead_letter_id = self.dead_letter(job, &err, record.attempts).await?;
        record.mark_failed(&err, now);
        self.save_status(&record).await?;
        Ok(ProcessOutcome::DeadLettered {
            dead_letter_id,
            category: err.category,
        })
    }

    async fn save_status(&self, record: &StatusRecord) -> Result<(), KvError> {
        kv::put_json(
            self.kv.as_ref(),
            &keys::order_status(&record.shop, record.order_id),
            record,
            None,
        )
        .await
    }

    async fn schedule_retry(
        &self,
        job: &OrderJob,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        err: &ClassifiedError,
    ) -> Result<(), KvError> {
        let retry = RetryJob {
            job: job.clone().with_source(JobSource::Retry),
            attempts,
            next_attempt_at,
            reason: err.message.clone(),
            category: err.category,
        };
        kv::put_json(
            self.kv.as_ref(),
            &keys::retry(&job.shop, job.order_id),
            &retry,
            None,
        )
        .await
    }

    async fn dead_letter(
        &self,
        job: &OrderJob,
        err: &ClassifiedError,
        attempts: u32,
    ) -> Result<String, KvError> {
        let now = Utc::now();
        let id = format!(
            "{}-{}",
            now.format("%Y%m%dT%H%M%S%.6fZ"),
            Uuid::new_v4().simple()
        );
        let entry = DeadLetterEntry {
            id: id.clone(),
            job: job.clone(),
            error: err.message.clone(),
            category: err.category,
            severity: err.severity,
            attempts,
            created_at: now,
        };

        kv::put_json(self.kv.as_ref(), &keys::dlq(&id), &entry, None).await?;
        self.kv.delete(&keys::retry(&job.shop, job.order_id)).await?;

        tracing::error!(
            dead_letter_id = %id,
            category = %err.category,
            severity = %err.severity,
            attempts,
            error = %err.message,
            "Order moved to dead-letter queue"
        );
        Ok(id)
    }

    // =========================================================================
    // Retry queue
    // =========================================================================

    /// Run every retry due at `now`.
    ///
    /// Each retry entry is deleted before its job runs, so concurrent sweeps
    /// never process the same order twice.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Kv` if the retry queue cannot be listed.
    #[instrument(skip(self))]
    pub async fn process_due_retries(&self, now: DateTime<Utc>) -> Result<RetrySweep, PipelineError> {
        let mut sweep = RetrySweep::default();
        let entries = self.kv.list(keys::RETRY_PREFIX, MAX_SCAN).await?;

        for key in entries {
            let retry = match kv::get_json::<RetryJob>(self.kv.as_ref(), &key).await {
                Ok(Some(retry)) => retry,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Unreadable retry entry");
                    continue;
                }
            };

            if retry.next_attempt_at > now {
                continue;
            }
            if !self.kv.delete(&key).await? {
                continue;
            }

            sweep.processed += 1;
            match self.process_order(retry.job.clone()).await {
                Ok(
                    ProcessOutcome::Completed { .. }
                    | ProcessOutcome::AlreadyProcessed
                    | ProcessOutcome::Skipped,
                ) => sweep.succeeded += 1,
                Ok(ProcessOutcome::RetryScheduled { .. }) => sweep.requeued += 1,
                Ok(ProcessOutcome::DeadLettered { .. } | ProcessOutcome::Invalid { .. }) => {
                    sweep.dead_lettered += 1;
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Retry failed, requeueing");
                    let requeued = RetryJob {
                        next_attempt_at: after(now, self.config.base_retry_delay),
                        reason: e.to_string(),
                        ..retry
                    };
                    kv::put_json(self.kv.as_ref(), &key, &requeued, None).await?;
                    sweep.requeued += 1;
                }
            }
        }

        if sweep.processed > 0 {
            tracing::info!(
                processed = sweep.processed,
                succeeded = sweep.succeeded,
                requeued = sweep.requeued,
                dead_lettered = sweep.dead_lettered,
                "Retry sweep finished"
            );
        }
        Ok(sweep)
    }

    /// Scheduled retries, soonest key first.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if listing or reading fails.
    pub async fn pending_retries(&self, limit: usize) -> Result<Vec<RetryJob>, KvError> {
        scheduled_retries(self.kv.as_ref(), limit).await
    }

    // =========================================================================
    // Dead-letter queue
    // =========================================================================

    /// Dead letters, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if listing or reading fails.
    pub async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, KvError> {
        dead_letters(self.kv.as_ref(), limit).await
    }

    /// Get one dead letter.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the read fails.
    pub async fn dead_letter_entry(&self, id: &str) -> Result<Option<DeadLetterEntry>, KvError> {
        kv::get_json(self.kv.as_ref(), &keys::dlq(id)).await
    }

    /// Remove a dead letter and process its order again from attempt zero.
    ///
    /// Returns `None` if no such entry exists.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Kv` if state cannot be read or written.
    #[instrument(skip(self))]
    pub async fn replay_dead_letter(&self, id: &str) -> Result<Option<ProcessOutcome>, PipelineError> {
        let Some(entry) = self.dead_letter_entry(id).await? else {
            return Ok(None);
        };
        if !self.kv.delete(&keys::dlq(id)).await? {
            return Ok(None);
        }

        tracing::info!(shop = %entry.job.shop, order_id = %entry.job.order_id, "Replaying dead letter");
        let outcome = self
            .process_order(entry.job.with_source(JobSource::Replay))
            .await?;
        Ok(Some(outcome))
    }

    /// Delete a dead letter. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the delete fails.
    #[instrument(skip(self))]
    pub async fn discard_dead_letter(&self, id: &str) -> Result<bool, KvError> {
        self.kv.delete(&keys::dlq(id)).await
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// The order's status record.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the read fails.
    pub async fn order_status(
        &self,
        shop: &ShopDomain,
        order_id: OrderId,
    ) -> Result<Option<StatusRecord>, KvError> {
        kv::get_json(self.kv.as_ref(), &keys::order_status(shop, order_id)).await
    }

    /// Count status records by status, plus queue sizes.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if listing or reading fails.
    pub async fn stats(&self) -> Result<PipelineStats, KvError> {
        let mut stats = PipelineStats::default();

        for key in self.kv.list(keys::ORDER_STATUS_PREFIX, MAX_SCAN).await? {
            if let Some(record) = kv::get_json::<StatusRecord>(self.kv.as_ref(), &key).await? {
                stats.count(record.status);
            }
        }
        stats.retry_queue = self.kv.list(keys::RETRY_PREFIX, MAX_SCAN).await?.len();
        stats.dead_letters = self.kv.list(keys::DLQ_PREFIX, MAX_SCAN).await?.len();

        Ok(stats)
    }
}

// =============================================================================
// Queue reads
// =============================================================================

/// Scheduled retries straight from storage, soonest key first.
///
/// Needs no Shopify credentials, so operators can inspect the queue with
/// only database access.
///
/// # Errors
///
/// Returns `KvError` if listing or reading fails.
pub async fn scheduled_retries(kv: &dyn KvStore, limit: usize) -> Result<Vec<RetryJob>, KvError> {
    read_prefix(kv, keys::RETRY_PREFIX, limit).await
}

/// Dead letters straight from storage, oldest first.
///
/// # Errors
///
/// Returns `KvError` if listing or reading fails.
pub async fn dead_letters(kv: &dyn KvStore, limit: usize) -> Result<Vec<DeadLetterEntry>, KvError> {
    read_prefix(kv, keys::DLQ_PREFIX, limit).await
}

async fn read_prefix<T: serde::de::DeserializeOwned>(
    kv: &dyn KvStore,
    prefix: &str,
    limit: usize,
) -> Result<Vec<T>, KvError> {
    let entries = kv.list(prefix, limit).await?;
    let mut values = Vec::with_capacity(entries.len());
    for key in entries {
        // Skip entries removed since the listing
        if let Some(value) = kv::get_json(kv, &key).await? {
            values.push(value);
        }
    }
    Ok(values)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::http::HeaderValue;

    use super::*;
    use crate::config::ShopifyAppConfig;
    use crate::kv::MemoryKvStore;
    use crate::services::error_handling::CircuitConfig;
    use crate::shopify::AdminClient;
    use crate::shopify::webhook::{
        HMAC_HEADER, SHOP_DOMAIN_HEADER, TOPIC_HEADER, WEBHOOK_ID_HEADER, sign_webhook_body,
    };

    const SECRET: &str = "shpss_pipeline_test_secret";

    fn pipeline() -> Pipeline {
        pipeline_on(Arc::new(MemoryKvStore::new()))
    }

    fn pipeline_on(kv: SharedKv) -> Pipeline {
        let shopify = ShopifyAppConfig {
            api_key: "key".to_string(),
            api_secret: SecretString::from(SECRET),
            api_version: "2025-01".to_string(),
            metafield_namespace: "custom".to_string(),
        };
        // Nothing listens here; tests below never reach the Admin API
        let client = AdminClient::with_base_url(&shopify, "http://127.0.0.1:9").unwrap();
        let config = PipelineConfig::default();
        Pipeline::new(
            Arc::clone(&kv),
            TokenStore::new(Arc::clone(&kv)),
            MetafieldService::new(client, "custom"),
            ErrorHandlingService::new(Arc::clone(&kv), CircuitConfig::from(&config)),
            config,
            SecretString::from(SECRET),
        )
    }

    fn shop() -> ShopDomain {
        ShopDomain::parse("store.myshopify.com").unwrap()
    }

    fn job(attrs: &[(&str, &str)]) -> OrderJob {
        OrderJob::direct(
            shop(),
            OrderId::new(1001),
            attrs
                .iter()
                .map(|(k, v)| NoteAttribute::new(*k, *v))
                .collect(),
        )
    }

    fn webhook_headers(body: &[u8], webhook_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HMAC_HEADER,
            HeaderValue::from_str(&sign_webhook_body(body, SECRET).unwrap()).unwrap(),
        );
        headers.insert(SHOP_DOMAIN_HEADER, HeaderValue::from_static("store.myshopify.com"));
        headers.insert(TOPIC_HEADER, HeaderValue::from_static("orders/create"));
        headers.insert(WEBHOOK_ID_HEADER, HeaderValue::from_str(webhook_id).unwrap());
        headers
    }

    #[test]
    fn test_retry_delay_backoff() {
        let config = PipelineConfig::default();
        assert_eq!(retry_delay(&config, 1), Duration::from_secs(30));
        assert_eq!(retry_delay(&config, 2), Duration::from_secs(60));
        assert_eq!(retry_delay(&config, 3), Duration::from_secs(120));
        assert_eq!(retry_delay(&config, 8), Duration::from_secs(3600));
        assert_eq!(retry_delay(&config, 40), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_no_delivery_attributes_skipped() {
        let p = pipeline();
        let outcome = p.process_order(job(&[("gift_note", "hi")])).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped);
        assert!(p.order_status(&shop(), OrderId::new(1001)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_attributes_dead_lettered() {
        let p = pipeline();
        let outcome = p
            .process_order(job(&[("delivery_date", "someday")]))
            .await
            .unwrap();

        let ProcessOutcome::Invalid { errors, dead_letter_id } = outcome else {
            panic!("expected invalid outcome");
        };
        assert_eq!(errors.len(), 1);

        let record = p.order_status(&shop(), OrderId::new(1001)).await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert_eq!(record.error_category, Some(ErrorCategory::Validation));

        let entry = p.dead_letter_entry(&dead_letter_id).await.unwrap().unwrap();
        assert_eq!(entry.category, ErrorCategory::Validation);
        assert_eq!(entry.severity, ErrorSeverity::Low);
        assert!(entry.error.starts_with("validation failed: "), "{}", entry.error);
        assert!(entry.error.contains("someday"), "{}", entry.error);
    }

    #[tokio::test]
    async fn test_missing_token_dead_lettered() {
        let p = pipeline();
        let outcome = p
            .process_order(job(&[("delivery_date", "2026-01-05")]))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ProcessOutcome::DeadLettered {
                category: ErrorCategory::Configuration,
                ..
            }
        ));
        let record = p.order_status(&shop(), OrderId::new(1001)).await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert_eq!(record.attempts, 1);

        let stats = p.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dead_letters, 1);
        assert_eq!(stats.retry_queue, 0);
    }

    #[tokio::test]
    async fn test_open_circuit_defers_without_attempt() {
        let p = pipeline();
        let err = ClassifiedError::from_category(ErrorCategory::ShopifyServer, "HTTP 503");
        for _ in 0..p.config().circuit_failure_threshold {
            p.errors().record_failure(&shop(), &err).await.unwrap();
        }

        let outcome = p
            .process_order(job(&[("delivery_date", "2026-01-05")]))
            .await
            .unwrap();
        let ProcessOutcome::RetryScheduled { attempts, category, .. } = outcome else {
            panic!("expected retry");
        };
        assert_eq!(attempts, 0);
        assert_eq!(category, ErrorCategory::CircuitOpen);

        let record = p.order_status(&shop(), OrderId::new(1001)).await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Retrying);
        assert!(record.next_retry_at.is_some());

        let pending = p.pending_retries(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job.source, JobSource::Retry);
    }

    #[tokio::test]
    async fn test_sweep_skips_retries_not_due() {
        let p = pipeline();
        let err = ClassifiedError::from_category(ErrorCategory::ShopifyServer, "HTTP 503");
        for _ in 0..p.config().circuit_failure_threshold {
            p.errors().record_failure(&shop(), &err).await.unwrap();
        }
        p.process_order(job(&[("delivery_date", "2026-01-05")]))
            .await
            .unwrap();

        let sweep = p.process_due_retries(Utc::now()).await.unwrap();
        assert_eq!(sweep, RetrySweep::default());
        assert_eq!(p.pending_retries(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_bad_signature_rejected() {
        let p = pipeline();
        let body = br#"{"id": 1001, "note_attributes": []}"#;
        let mut headers = webhook_headers(body, "wh-1");
        headers.insert(HMAC_HEADER, HeaderValue::from_static("AAAA"));

        let err = p.handle_order_webhook(&headers, body).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Webhook(WebhookError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_webhook_duplicate_delivery() {
        let p = pipeline();
        let body = br#"{"id": 1001, "note_attributes": [{"name": "note", "value": "x"}]}"#;
        let headers = webhook_headers(body, "wh-dup");

        let first = p.handle_order_webhook(&headers, body).await.unwrap();
        assert_eq!(first, WebhookOutcome::Processed(ProcessOutcome::Skipped));

        let second = p.handle_order_webhook(&headers, body).await.unwrap();
        assert_eq!(second, WebhookOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_webhook_malformed_body() {
        let p = pipeline();
        let body = b"not json";
        let headers = webhook_headers(body, "wh-bad");
        let err = p.handle_order_webhook(&headers, body).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Webhook(WebhookError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_discard_dead_letter() {
        let p = pipeline();
        p.process_order(job(&[("delivery_date", "bad")]))
            .await
            .unwrap();
        let letters = p.list_dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 1);

        assert!(p.discard_dead_letter(&letters[0].id).await.unwrap());
        assert!(!p.discard_dead_letter(&letters[0].id).await.unwrap());
        assert!(p.list_dead_letters(10).await.unwrap().is_empty());
        assert!(p.replay_dead_letter(&letters[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uninstall_removes_token() {
        let p = pipeline();
        p.tokens().save(&shop(), "shpat_x", vec![]).await.unwrap();
        let body = br#"{"id": 1}"#;
        let headers = webhook_headers(body, "wh-uninstall");

        assert!(p.handle_app_uninstalled(&headers, body).await.unwrap());
        assert!(p.tokens().get(&shop()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queue_reads_need_only_storage() {
        let kv: SharedKv = Arc::new(MemoryKvStore::new());
        let p = pipeline_on(Arc::clone(&kv));
        p.process_order(job(&[("delivery_date", "2026-01-05")]))
            .await
            .unwrap();

        let retry = RetryJob {
            job: OrderJob::direct(shop(), OrderId::new(2002), vec![]),
            attempts: 1,
            next_attempt_at: Utc::now(),
            reason: "HTTP 503".to_string(),
            category: ErrorCategory::ShopifyServer,
        };
        kv::put_json(
            kv.as_ref(),
            &keys::retry(&shop(), OrderId::new(2002)),
            &retry,
            None,
        )
        .await
        .unwrap();

        let letters = dead_letters(kv.as_ref(), 10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].job.order_id, OrderId::new(1001));
        assert_eq!(letters, p.list_dead_letters(10).await.unwrap());

        let retries = scheduled_retries(kv.as_ref(), 10).await.unwrap();
        assert_eq!(retries, vec![retry]);
    }
}
