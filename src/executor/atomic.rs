//! The atomic phase primitive.
//!
//! One serialisable transaction per phase: the phase's domain writes, any
//! staged job, and the key-row update commit together or not at all. No
//! side-effect-visible state change persists unless its recovery-point
//! advance commits with it; once committed, the effect is recorded as done
//! and will not be re-attempted.

use chrono::{DateTime, Utc};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncPgConnection;
use tracing::debug;

use crate::domain::{IdempotencyKey, KeyUpdate, RecoveryPoint, StoredResponse};
use crate::outbound::persistence::key_store::update_key;
use crate::outbound::persistence::outbox::enqueue_job;

use super::phases::{Phase, PhaseOutcome};
use super::ExecutorError;

/// Run one phase against the key inside a serialisable transaction and
/// return the post-commit key row.
///
/// A phase error rolls everything back; classification and retry are the
/// caller's concern.
pub async fn run_atomic_phase(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
    key: &IdempotencyKey,
    phase: &dyn Phase,
) -> Result<IdempotencyKey, ExecutorError> {
    conn.build_transaction()
        .serializable()
        .run(|tx| {
            async move {
                let outcome = phase.execute(tx, key).await?;
                apply_outcome(tx, now, key, outcome).await
            }
            .scope_boxed()
        })
        .await
}

/// Apply a phase outcome to the key row inside the phase transaction.
async fn apply_outcome(
    tx: &mut AsyncPgConnection,
    now: DateTime<Utc>,
    key: &IdempotencyKey,
    outcome: PhaseOutcome,
) -> Result<IdempotencyKey, ExecutorError> {
    let update = match outcome {
        PhaseOutcome::Advance(next) => KeyUpdate {
            recovery_point: Some(next),
            last_run_at: Some(now),
            ..KeyUpdate::default()
        },
        PhaseOutcome::Complete { status, body } => KeyUpdate {
            recovery_point: Some(RecoveryPoint::Finished),
            locked_at: Some(None),
            last_run_at: Some(now),
            response: Some(StoredResponse { status, body }),
        },
        PhaseOutcome::Defer { job, next } => {
            enqueue_job(tx, &job.name, &job.args).await?;
            KeyUpdate {
                recovery_point: Some(next),
                last_run_at: Some(now),
                ..KeyUpdate::default()
            }
        }
    };

    let updated = update_key(tx, key.id, &update).await?;
    debug!(
        key_id = key.id,
        from = %key.recovery_point,
        to = %updated.recovery_point,
        "phase committed"
    );
    Ok(updated)
}
