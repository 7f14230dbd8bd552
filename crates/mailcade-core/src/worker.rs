//! Worker pool - bounded-concurrency consumer of the delivery queue
//!
//! Each poll cycle leases due jobs and runs the send state machine for
//! every one of them: claim the message, consult the rate limiter, hand
//! the envelope to the transport, and record the outcome. Quota denials
//! reschedule the work under a new attempt id instead of burning a
//! retry; transport failures go back to the queue for backoff
//! redelivery until the retry budget is spent.

use anyhow::Result;
use chrono::Duration;
use mailcade_storage::db::DatabasePool;
use mailcade_storage::models::Message;
use mailcade_storage::repository::{BatchRepository, MessageRepository, SenderRepository};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, timeout, Duration as TokioDuration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::queue::{EnqueueOptions, JobQueue, LeasedJob, SendJob};
use crate::ratelimit::RateLimiter;
use crate::text::html_to_text;
use crate::transport::{Envelope, SmtpSettings, Transport};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent in-flight sends
    pub concurrency: usize,
    /// Seconds between poll cycles
    pub poll_interval_secs: u64,
    /// Jobs leased per cycle
    pub batch_size: i64,
    /// Lease duration; expired leases are redelivered
    pub lease_secs: i64,
    /// Grace period for in-flight sends at shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval_secs: 5,
            batch_size: 50,
            lease_secs: 120,
            shutdown_grace_secs: 30,
        }
    }
}

/// Worker pool
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    config: WorkerConfig,
}

/// Shared dependencies of every in-flight send task
struct WorkerContext {
    queue: Arc<JobQueue>,
    messages: MessageRepository,
    senders: SenderRepository,
    batches: BatchRepository,
    rate_limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    default_transport: SmtpSettings,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: &DatabasePool,
        queue: Arc<JobQueue>,
        rate_limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
        default_transport: SmtpSettings,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            ctx: Arc::new(WorkerContext {
                queue,
                messages: MessageRepository::new(pool.clone()),
                senders: SenderRepository::new(pool.clone()),
                batches: BatchRepository::new(pool),
                rate_limiter,
                transport,
                default_transport,
                clock,
            }),
            config,
        }
    }

    /// Run until the shutdown signal flips, then drain in-flight sends
    /// within the grace period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(TokioDuration::from_secs(self.config.poll_interval_secs));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        info!(
            concurrency = self.config.concurrency,
            batch = self.config.batch_size,
            interval = self.config.poll_interval_secs,
            "Worker pool started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.process_due_jobs(&semaphore).await {
                error!("Error processing due jobs: {}", e);
            }

            if let Err(e) = self.run_maintenance().await {
                warn!("Maintenance pass failed: {}", e);
            }
        }

        info!("Worker pool stopping; draining in-flight sends");
        self.drain(&semaphore).await;
    }

    /// Lease due jobs and spawn one bounded task per job
    async fn process_due_jobs(&self, semaphore: &Arc<Semaphore>) -> Result<()> {
        let lease = Duration::seconds(self.config.lease_secs);
        let jobs = self.ctx.queue.fetch_due(self.config.batch_size, lease).await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!(count = jobs.len(), "Leased due jobs");

        for job in jobs {
            let permit = semaphore.clone().acquire_owned().await?;
            let ctx = self.ctx.clone();

            tokio::spawn(async move {
                if let Err(e) = ctx.process_job(&job).await {
                    error!(job_id = %job.job_id, "Job processing error: {}", e);
                }
                drop(permit);
            });
        }

        Ok(())
    }

    /// Queue removal policies and rate-counter reclamation
    async fn run_maintenance(&self) -> Result<()> {
        self.ctx.queue.cleanup().await?;
        self.ctx.rate_limiter.cleanup_old_counters().await?;

        let stats = self.ctx.queue.stats().await?;
        if stats.pending > 0 || stats.active > 0 {
            debug!(
                pending = stats.pending,
                active = stats.active,
                dead = stats.dead,
                "Queue depth"
            );
        }

        Ok(())
    }

    /// Wait for all permits to return, bounded by the grace period.
    /// Sends still running afterwards are abandoned; their messages stay
    /// in PROCESSING until the expired lease redelivers the job.
    async fn drain(&self, semaphore: &Arc<Semaphore>) {
        let grace = TokioDuration::from_secs(self.config.shutdown_grace_secs);
        let all = self.config.concurrency as u32;

        match timeout(grace, semaphore.acquire_many(all)).await {
            Ok(Ok(_)) => info!("All in-flight sends completed"),
            Ok(Err(e)) => error!("Semaphore closed during drain: {}", e),
            Err(_) => warn!(
                grace_secs = self.config.shutdown_grace_secs,
                "Grace period elapsed; abandoning in-flight sends"
            ),
        }
    }
}

impl WorkerContext {
    /// The send state machine for one leased job
    async fn process_job(&self, job: &LeasedJob) -> Result<()> {
        let payload = &job.payload;

        // Claim the message. A missing row means the user cancelled; the
        // job is acknowledged and dropped without touching the transport.
        let message = match self.messages.mark_processing(payload.message_id, &job.job_id).await? {
            Some(message) => message,
            None => {
                debug!(message_id = %payload.message_id, "Message gone; dropping job");
                self.queue.complete(job.id).await?;
                return Ok(());
            }
        };

        // Quota gate. A denial reschedules under the next attempt id and
        // acknowledges this job as completed-with-deferral, keeping the
        // queue's backoff out of quota waits.
        let decision = self.rate_limiter.check(payload.sender_id).await?;
        if !decision.allowed {
            let next_slot_at = self.rate_limiter.next_slot(payload.sender_id).await?;
            return self.defer_rate_limited(job, &message, next_slot_at).await;
        }

        // Resolve the sender: it supplies the From header and, when it
        // carries private transport settings, the outbound hop.
        let sender = match payload.sender_id {
            Some(id) => self.senders.get(id).await?,
            None => None,
        };
        let Some(sender) = sender else {
            return self
                .handle_send_failure(job, &message, "Sender no longer exists")
                .await;
        };

        let settings = SmtpSettings::for_sender(&sender, &self.default_transport);
        let envelope = Envelope {
            from: from_header(&sender.name, &sender.email),
            to: payload.recipient.clone(),
            subject: payload.subject.clone(),
            html: payload.body.clone(),
            text: Some(html_to_text(&payload.body)),
        };

        match self.transport.send(&settings, &envelope).await {
            Ok(outcome) => {
                // Increment strictly after the successful send so the
                // counters never run ahead of reality.
                self.rate_limiter.increment(payload.sender_id).await?;

                let provider_id = outcome
                    .message_id
                    .unwrap_or_else(|| format!("<{}@mailcade>", Uuid::new_v4()));

                self.messages
                    .mark_sent(
                        message.id,
                        self.clock.now(),
                        &provider_id,
                        outcome.preview_url.as_deref(),
                    )
                    .await?;
                self.batches.increment_sent(payload.batch_id).await?;
                self.queue.complete(job.id).await?;

                info!(
                    message_id = %message.id,
                    provider_id = %provider_id,
                    "Message sent"
                );
                Ok(())
            }
            Err(e) => self.handle_send_failure(job, &message, &e.to_string()).await,
        }
    }

    /// Park the message until the next quota slot and re-enqueue under a
    /// fresh attempt id.
    async fn defer_rate_limited(
        &self,
        job: &LeasedJob,
        message: &Message,
        next_slot_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.messages.mark_rate_limited(message.id, next_slot_at).await?;

        let requeued = SendJob {
            attempt: job.payload.attempt + 1,
            ..job.payload.clone()
        };
        let delay = (next_slot_at - self.clock.now()).max(Duration::zero());

        self.queue
            .enqueue(
                &requeued,
                &EnqueueOptions {
                    delay,
                    priority: message.batch_index,
                },
            )
            .await?;
        self.queue.complete(job.id).await?;

        debug!(
            message_id = %message.id,
            %next_slot_at,
            "Rate limited; rescheduled for next slot"
        );
        Ok(())
    }

    /// Transport failure: FAILED once the retry budget is spent,
    /// otherwise back to SCHEDULED with the queue redelivering after
    /// backoff.
    async fn handle_send_failure(
        &self,
        job: &LeasedJob,
        message: &Message,
        error: &str,
    ) -> Result<()> {
        if message.retry_count + 1 >= message.max_retries {
            warn!(
                message_id = %message.id,
                retries = message.retry_count + 1,
                "Retries exhausted: {}",
                error
            );

            self.messages.mark_failed(message.id, error).await?;
            self.batches.increment_failed(message.batch_id).await?;
            self.queue.discard(job.id, error).await?;
            return Ok(());
        }

        warn!(
            message_id = %message.id,
            attempt = message.retry_count + 1,
            "Transient send failure, will retry: {}",
            error
        );

        self.messages.mark_retry_scheduled(message.id, error).await?;

        if !self.queue.fail(job, error).await? {
            // The queue's attempt budget and the message's retry budget
            // are provisioned together; disagreement means lost work.
            error!(
                message_id = %message.id,
                "Queue retries exhausted before message retries"
            );
        }

        Ok(())
    }
}

/// `"<name>" <email>` From header
fn from_header(name: &str, email: &str) -> String {
    format!("\"{}\" <{}>", name, email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_header_format() {
        assert_eq!(
            from_header("Jane Doe", "jane@example.com"),
            "\"Jane Doe\" <jane@example.com>"
        );
    }

    #[test]
    fn test_deferral_delay_never_negative() {
        // A slot already in the past produces an immediate redelivery,
        // not a negative visibility delay.
        let now: chrono::DateTime<chrono::Utc> = "2025-01-01T11:00:05Z".parse().unwrap();
        let next_slot: chrono::DateTime<chrono::Utc> = "2025-01-01T11:00:00Z".parse().unwrap();
        let delay = (next_slot - now).max(Duration::zero());
        assert_eq!(delay, Duration::zero());
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 5);
        assert!(config.lease_secs > 30, "lease must outlive the SMTP timeout");
    }
}
