//! The decision every privileged handler makes: act now, or ask the quorum.

use tracing::debug;

use cerca_db::{Database, Finalization, Moderation};
use cerca_types::api::{FinalizeResponse, ModerationOutcome};
use cerca_types::models::ActionKind;

/// Carries out `effect` against `recipient_id` directly while fewer than two
/// admins exist, and opens the matching proposal otherwise.
///
/// A duplicate proposal still reports [`ModerationOutcome::Proposed`]: the
/// pending one stands.
pub fn moderate(
    db: &Database,
    acting_id: i64,
    recipient_id: i64,
    effect: ActionKind,
) -> cerca_db::Result<ModerationOutcome> {
    match db.moderate(acting_id, recipient_id, effect)? {
        Moderation::Applied => Ok(ModerationOutcome::Applied),
        Moderation::Proposed { created } => {
            if !created {
                debug!("{} for user {} is already pending", effect, recipient_id);
            }
            Ok(ModerationOutcome::Proposed)
        }
    }
}

pub fn finalize_response(finalization: Finalization) -> FinalizeResponse {
    match finalization {
        Finalization::AlreadyFinalized => FinalizeResponse::AlreadyFinalized,
        Finalization::TooEarly { opens_at } => FinalizeResponse::TooEarly { opens_at },
        Finalization::Vetoed => FinalizeResponse::Vetoed,
        Finalization::Confirmed { .. } => FinalizeResponse::Confirmed,
    }
}
