//! Order state machine.
//!
//! Drives an order from `paid` through `processing` to `completed` or
//! `failed`. Every transition is a conditional write in the repository, so
//! concurrent triggers and stale replays resolve at the store: the second of
//! two concurrent triggers loses the `paid -> processing` claim and reports a
//! no-op. Failures are persisted for operator-initiated re-runs; there is no
//! automatic retry.

use crate::error::AppError;
use crate::models::{AnalysisResult, OrderStatus, TuneOrder};
use crate::services::analysis::{AnalysisClient, AnalysisRequest};
use crate::services::decoder::DecoderClient;
use crate::services::mailer::Mailer;
use crate::services::metrics;
use crate::services::repository::TuneRepository;
use crate::services::storage::Storage;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Result of one processing trigger, reported to the caller.
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Completed { order_number: String },
    /// Non-forced trigger of an already completed order; a deliberate no-op
    /// so webhook replays and double-clicks stay benign.
    AlreadyCompleted,
    /// Another trigger holds the processing claim.
    AlreadyProcessing,
    /// The order left `processing` under us (e.g. a forced reset mid-run);
    /// this run's terminal write was discarded.
    Superseded,
    Failed { error: String },
}

#[derive(Clone)]
pub struct OrderProcessor {
    repository: TuneRepository,
    storage: Arc<dyn Storage>,
    decoder: Arc<dyn DecoderClient>,
    analysis: Arc<dyn AnalysisClient>,
    mailer: Arc<Mailer>,
}

impl OrderProcessor {
    pub fn new(
        repository: TuneRepository,
        storage: Arc<dyn Storage>,
        decoder: Arc<dyn DecoderClient>,
        analysis: Arc<dyn AnalysisClient>,
        mailer: Arc<Mailer>,
    ) -> Self {
        Self {
            repository,
            storage,
            decoder,
            analysis,
            mailer,
        }
    }

    /// Trigger processing of an order.
    ///
    /// `force` re-runs a terminal (`completed`/`failed`) order by resetting it
    /// to `paid` first, clearing prior outputs. Without `force`, a completed
    /// order is a reported no-op and a failed order is a conflict.
    pub async fn process(&self, order_id: Uuid, force: bool) -> Result<ProcessOutcome, AppError> {
        let order = self
            .repository
            .find_order(order_id)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::not_found("order_not_found", "Unknown order"))?;

        match order.status {
            OrderStatus::Pending => {
                return Err(AppError::conflict(
                    "order_not_paid",
                    "Order has not been paid yet",
                ));
            }
            OrderStatus::Processing => return Ok(ProcessOutcome::AlreadyProcessing),
            OrderStatus::Completed if !force => return Ok(ProcessOutcome::AlreadyCompleted),
            OrderStatus::Failed if !force => {
                return Err(AppError::conflict(
                    "order_already_failed",
                    "Order already failed; re-run with force to retry",
                ));
            }
            OrderStatus::Completed | OrderStatus::Failed => {
                if !self
                    .repository
                    .reset_for_reprocess(order_id)
                    .await
                    .map_err(AppError::DatabaseError)?
                {
                    // Someone else reset or re-ran it first.
                    return Ok(ProcessOutcome::AlreadyProcessing);
                }
                tracing::info!(order_number = %order.order_number, "Order reset for forced reprocessing");
            }
            OrderStatus::Paid => {}
        }

        if !self
            .repository
            .begin_processing(order_id)
            .await
            .map_err(AppError::DatabaseError)?
        {
            return Ok(ProcessOutcome::AlreadyProcessing);
        }
        metrics::record_order_transition("processing");

        // Reload after the claim so a forced run works from the cleared state.
        let order = self
            .repository
            .find_order(order_id)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::not_found("order_not_found", "Unknown order"))?;

        match self.run(&order).await {
            Ok(outcome) => Ok(outcome),
            Err(reason) => {
                // A delivery failure arrives after the completed write, so the
                // transition to failed may come from either state.
                self.mark_failed(
                    &order,
                    &[OrderStatus::Processing, OrderStatus::Completed],
                    &reason,
                )
                .await?;
                Ok(ProcessOutcome::Failed { error: reason })
            }
        }
    }

    /// Steps 2-5: decode, analyze, persist terminal state, deliver.
    /// Returns Err with a human-readable reason on any collaborator failure;
    /// the caller marks the order failed.
    async fn run(&self, order: &TuneOrder) -> Result<ProcessOutcome, String> {
        tracing::info!(order_number = %order.order_number, "Processing order");

        let raw_log = self
            .storage
            .download(&order.log_storage_key)
            .await
            .map_err(|e| format!("Failed to load stored log: {}", e))?;

        let decoded = self
            .decoder
            .decode(raw_log)
            .await
            .map_err(|e| format!("decoder_failed: {}", e))?;

        tracing::debug!(
            order_number = %order.order_number,
            duration_s = decoded.meta.duration_s,
            "Log decoded"
        );

        let request = AnalysisRequest {
            metrics: decoded,
            original_config: order.cli_dump.clone(),
            problem_description: order.problem_description.clone(),
            tuning_goals: order.tuning_goals.clone(),
            flying_style: order.flying_style.clone(),
            frame_description: order.frame_description.clone(),
            locale: order.locale.clone(),
        };

        let result = self
            .analysis
            .analyze(request)
            .await
            .map_err(|e| format!("analysis_failed: {}", e))?;

        let commands = result.cli_commands.clone().unwrap_or_default();

        let completed = self
            .repository
            .complete_order(order.id, &result, &commands)
            .await
            .map_err(|e| format!("Failed to persist analysis result: {}", e))?;
        if !completed {
            tracing::warn!(
                order_number = %order.order_number,
                "Order left processing before the terminal write; discarding this run"
            );
            return Ok(ProcessOutcome::Superseded);
        }
        metrics::record_order_transition("completed");

        tracing::info!(order_number = %order.order_number, "Order completed");

        self.deliver(order, &result, &commands)
            .await
            .map_err(|e| format!("delivery_failed: {}", e))?;

        Ok(ProcessOutcome::Completed {
            order_number: order.order_number.clone(),
        })
    }

    /// Step 5: render the delivery report, store it, email it.
    async fn deliver(
        &self,
        order: &TuneOrder,
        result: &AnalysisResult,
        commands: &str,
    ) -> Result<(), String> {
        let report = render_report(order, result, commands);
        let report_key = format!("reports/{}.txt", order.order_number);

        self.storage
            .upload(&report_key, report.clone().into_bytes())
            .await
            .map_err(|e| format!("Failed to store report: {}", e))?;

        let subject = format!("Your tune is ready - {}", order.order_number);
        self.mailer
            .send(&order.email, &subject, &report)
            .await
            .map_err(|e| e.to_string())?;

        self.repository
            .mark_delivered(order.id, &report_key)
            .await
            .map_err(|e| format!("Failed to record delivery: {}", e))?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        order: &TuneOrder,
        from: &[OrderStatus],
        reason: &str,
    ) -> Result<(), AppError> {
        tracing::error!(
            order_number = %order.order_number,
            error = %reason,
            "Order processing failed"
        );
        self.repository
            .fail_order(order.id, from, reason)
            .await
            .map_err(AppError::DatabaseError)?;
        metrics::record_order_transition("failed");
        Ok(())
    }

    /// Fire-and-forget trigger used by the webhook and promo-checkout paths.
    /// Processing runs to completion server-side regardless of the client.
    pub fn spawn_process(self: Arc<Self>, order_id: Uuid) {
        tokio::spawn(async move {
            if let Err(e) = self.process(order_id, false).await {
                tracing::error!(order_id = %order_id, error = %e, "Background processing trigger failed");
            }
        });
    }
}

fn render_report(order: &TuneOrder, result: &AnalysisResult, commands: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("Tune report for order {}\n\n", order.order_number));
    out.push_str(&result.analysis.summary);
    out.push_str("\n\n");

    if !result.analysis.issues.is_empty() {
        out.push_str("Issues found:\n");
        for issue in &result.analysis.issues {
            out.push_str(&format!("  - {}\n", issue));
        }
        out.push('\n');
    }
    if !result.analysis.recommendations.is_empty() {
        out.push_str("Recommendations:\n");
        for rec in &result.analysis.recommendations {
            out.push_str(&format!("  - {}\n", rec));
        }
        out.push('\n');
    }

    out.push_str("PID values:\n");
    for (axis, pid) in [
        ("roll", &result.pid.roll),
        ("pitch", &result.pid.pitch),
        ("yaw", &result.pid.yaw),
    ] {
        out.push_str(&format!(
            "  {:5} P={} I={} D={} F={}\n",
            axis, pid.p, pid.i, pid.d, pid.f
        ));
    }
    out.push('\n');

    if !commands.is_empty() {
        out.push_str("Apply with the CLI:\n\n");
        out.push_str(commands);
        out.push('\n');
    }

    out
}
