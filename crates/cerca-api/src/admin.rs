use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use cerca_db::Database;
use cerca_types::api::{
    AdminActionRequest, AdminsResponse, Claims, CredentialsResponse, FinalizeResponse,
    ModerationLogItem, ModerationResponse, ProposalsResponse,
};
use cerca_types::models::{ActionKind, DELETED_USER_NAME};

use crate::auth::{AppState, generate_password, hash_or_500, validate_username};
use crate::moderation::{finalize_response, moderate};
use crate::{blocking, status};

fn require_admin(db: &Database, claims: &Claims) -> Result<(), StatusCode> {
    if db.is_admin(claims.sub).map_err(status)? {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// Resolves the target of a privileged action. The deleted-user sentinel is
/// never a valid target.
fn target(db: &Database, username: &str) -> Result<i64, StatusCode> {
    if username == DELETED_USER_NAME {
        return Err(StatusCode::CONFLICT);
    }
    db.get_user_id(username).map_err(status)
}

async fn act(
    state: AppState,
    claims: Claims,
    req: AdminActionRequest,
    effect: ActionKind,
) -> Result<Json<ModerationResponse>, StatusCode> {
    let outcome = blocking(&state, move |db| {
        require_admin(db, &claims)?;
        let recipient_id = target(db, &req.username)?;
        moderate(db, claims.sub, recipient_id, effect).map_err(status)
    })
    .await?;

    Ok(Json(ModerationResponse { outcome }))
}

pub async fn make_admin(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AdminActionRequest>,
) -> Result<Json<ModerationResponse>, StatusCode> {
    act(state, claims, req, ActionKind::AdminMake).await
}

pub async fn demote_admin(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AdminActionRequest>,
) -> Result<Json<ModerationResponse>, StatusCode> {
    act(state, claims, req, ActionKind::AdminDemote).await
}

pub async fn remove_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AdminActionRequest>,
) -> Result<Json<ModerationResponse>, StatusCode> {
    act(state, claims, req, ActionKind::RemoveUser).await
}

async fn finalize(
    state: AppState,
    claims: Claims,
    proposal_id: i64,
    decision: bool,
) -> Result<Json<FinalizeResponse>, StatusCode> {
    let finalization = blocking(&state, move |db| {
        require_admin(db, &claims)?;
        db.finalize_proposal(proposal_id, claims.sub, decision)
            .map_err(status)
    })
    .await?;

    Ok(Json(finalize_response(finalization)))
}

pub async fn confirm_proposal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(proposal_id): Path<i64>,
) -> Result<Json<FinalizeResponse>, StatusCode> {
    finalize(state, claims, proposal_id, true).await
}

pub async fn veto_proposal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(proposal_id): Path<i64>,
) -> Result<Json<FinalizeResponse>, StatusCode> {
    finalize(state, claims, proposal_id, false).await
}

pub async fn proposals(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ProposalsResponse>, StatusCode> {
    let proposals = blocking(&state, move |db| {
        require_admin(db, &claims)?;
        db.get_proposals().map_err(status)
    })
    .await?;

    Ok(Json(ProposalsResponse { proposals }))
}

/// Current admins and whether their actions need a quorum.
pub async fn admins(State(state): State<AppState>) -> Result<Json<AdminsResponse>, StatusCode> {
    let (admins, quorum_active) = blocking(&state, |db| {
        Ok((
            db.admins().map_err(status)?,
            db.quorum_active().map_err(status)?,
        ))
    })
    .await?;

    Ok(Json(AdminsResponse {
        admins,
        quorum_active,
    }))
}

/// The public moderation log, newest first.
pub async fn moderation_log(
    State(state): State<AppState>,
) -> Result<Json<Vec<ModerationLogItem>>, StatusCode> {
    let entries = blocking(&state, |db| db.get_logs().map_err(status)).await?;
    Ok(Json(entries.into_iter().map(ModerationLogItem::from).collect()))
}

/// Issues a fresh random password for a user. Never subject to quorum.
pub async fn reset_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AdminActionRequest>,
) -> Result<Json<CredentialsResponse>, StatusCode> {
    let admin_id = claims.sub;
    let credentials = blocking(&state, move |db| {
        require_admin(db, &claims)?;
        let user_id = target(db, &req.username)?;
        let password = generate_password();
        let hash = hash_or_500(&password)?;
        db.admin_reset_password(admin_id, user_id, &hash)
            .map_err(status)?;
        Ok(CredentialsResponse {
            user_id,
            username: req.username,
            password,
        })
    })
    .await?;

    info!("Admin {} reset a password", admin_id);
    Ok(Json(credentials))
}

/// Creates an account with a random password on an admin's behalf. Never
/// subject to quorum.
pub async fn add_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AdminActionRequest>,
) -> Result<(StatusCode, Json<CredentialsResponse>), StatusCode> {
    validate_username(&req.username)?;

    let admin_id = claims.sub;
    let credentials = blocking(&state, move |db| {
        require_admin(db, &claims)?;
        if db.check_username_exists(&req.username).map_err(status)? {
            return Err(StatusCode::CONFLICT);
        }
        let password = generate_password();
        let hash = hash_or_500(&password)?;
        let user_id = db
            .admin_add_user(admin_id, &req.username, &hash)
            .map_err(status)?;
        Ok(CredentialsResponse {
            user_id,
            username: req.username,
            password,
        })
    })
    .await?;

    Ok((StatusCode::CREATED, Json(credentials)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use cerca_db::ManualClock;
    use cerca_types::api::{LoginRequest, ModerationOutcome};
    use cerca_types::models::{EntryShape, proposal_self_confirmation_wait};

    use super::*;
    use crate::auth::login;
    use crate::testutil::{admin, state, state_with_clock, user};

    fn req(username: &str) -> Json<AdminActionRequest> {
        Json(AdminActionRequest {
            username: username.to_string(),
        })
    }

    #[tokio::test]
    async fn single_admin_promotes_directly() {
        let state = state();
        let alice = admin(&state, "alice");
        let bob = user(&state, "bob");

        let Json(resp) = make_admin(State(state.clone()), Extension(alice), req("bob"))
            .await
            .unwrap();
        assert_eq!(resp.outcome, ModerationOutcome::Applied);
        assert!(state.db.is_admin(bob.sub).unwrap());

        let Json(log) = moderation_log(State(state.clone())).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].shape, EntryShape::DirectEffect);
        assert_eq!(log[0].entry.action, ActionKind::AdminMake);
    }

    #[tokio::test]
    async fn quorum_promotion_needs_a_second_admin() {
        let state = state();
        let alice = admin(&state, "alice");
        let carol = admin(&state, "carol");
        let dave = user(&state, "dave");

        let Json(resp) = make_admin(State(state.clone()), Extension(alice.clone()), req("dave"))
            .await
            .unwrap();
        assert_eq!(resp.outcome, ModerationOutcome::Proposed);
        assert!(!state.db.is_admin(dave.sub).unwrap());

        let Json(pending) = proposals(State(state.clone()), Extension(carol.clone()))
            .await
            .unwrap();
        assert_eq!(pending.proposals.len(), 1);
        let proposal_id = pending.proposals[0].id;

        // clients learn when the proposer may confirm without asking the server again
        let opens_at = pending.proposals[0].time + proposal_self_confirmation_wait();
        let body = serde_json::to_value(&pending).unwrap();
        assert_eq!(
            body["proposals"][0]["self_confirm_after"],
            serde_json::to_value(opens_at).unwrap()
        );

        let Json(done) =
            confirm_proposal(State(state.clone()), Extension(carol.clone()), Path(proposal_id))
                .await
                .unwrap();
        assert_eq!(done, FinalizeResponse::Confirmed);
        assert!(state.db.is_admin(dave.sub).unwrap());

        let Json(again) = veto_proposal(State(state.clone()), Extension(carol), Path(proposal_id))
            .await
            .unwrap();
        assert_eq!(again, FinalizeResponse::AlreadyFinalized);

        let Json(log) = moderation_log(State(state)).await.unwrap();
        let shapes: Vec<_> = log.iter().map(|item| item.shape).collect();
        assert_eq!(shapes, vec![EntryShape::Finalization, EntryShape::ProposalAnnouncement]);
    }

    #[tokio::test]
    async fn proposer_waits_before_confirming() {
        let clock = ManualClock::new(chrono::Utc::now());
        let state = state_with_clock(clock.clone());
        let alice = admin(&state, "alice");
        admin(&state, "carol");
        user(&state, "dave");

        let Json(resp) = remove_user(State(state.clone()), Extension(alice.clone()), req("dave"))
            .await
            .unwrap();
        assert_eq!(resp.outcome, ModerationOutcome::Proposed);
        let proposal_id = state.db.get_proposals().unwrap()[0].id;

        clock.advance(TimeDelta::days(3));
        let Json(early) =
            confirm_proposal(State(state.clone()), Extension(alice.clone()), Path(proposal_id))
                .await
                .unwrap();
        assert!(matches!(early, FinalizeResponse::TooEarly { .. }));

        clock.advance(TimeDelta::days(4));
        let Json(done) = confirm_proposal(State(state.clone()), Extension(alice), Path(proposal_id))
            .await
            .unwrap();
        assert_eq!(done, FinalizeResponse::Confirmed);
        assert!(state.db.get_user_id("dave").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn privileged_actions_need_an_admin() {
        let state = state();
        admin(&state, "alice");
        let bob = user(&state, "bob");

        let err = make_admin(State(state.clone()), Extension(bob.clone()), req("bob"))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::FORBIDDEN);

        let err = confirm_proposal(State(state.clone()), Extension(bob.clone()), Path(1))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::FORBIDDEN);

        let err = reset_password(State(state), Extension(bob), req("alice"))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn bad_targets() {
        let state = state();
        let alice = admin(&state, "alice");

        let sentinel = req(DELETED_USER_NAME);
        let err = remove_user(State(state.clone()), Extension(alice.clone()), sentinel)
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::CONFLICT);

        let err = remove_user(State(state.clone()), Extension(alice.clone()), req("nobody"))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);

        // a lone admin may step down
        let Json(resp) = demote_admin(State(state.clone()), Extension(alice.clone()), req("alice"))
            .await
            .unwrap();
        assert_eq!(resp.outcome, ModerationOutcome::Applied);
        assert!(!state.db.is_admin(alice.sub).unwrap());

        // only the demotion made it into the log
        let Json(log) = moderation_log(State(state)).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].shape, EntryShape::DirectEffect);
        assert_eq!(log[0].entry.action, ActionKind::AdminDemote);
        assert_eq!(log[0].entry.acting_name, "alice");
        assert_eq!(log[0].entry.recipient_name.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn quorum_demotion_is_confirmed_by_another_admin() {
        let state = state();
        let alice = admin(&state, "alice");
        let bob = admin(&state, "bob");
        let carol = admin(&state, "carol");

        let Json(resp) = demote_admin(State(state.clone()), Extension(alice.clone()), req("bob"))
            .await
            .unwrap();
        assert_eq!(resp.outcome, ModerationOutcome::Proposed);
        assert!(state.db.is_admin(bob.sub).unwrap());

        let proposal_id = state.db.get_proposals().unwrap()[0].id;
        let Json(done) = confirm_proposal(State(state.clone()), Extension(carol), Path(proposal_id))
            .await
            .unwrap();
        assert_eq!(done, FinalizeResponse::Confirmed);
        assert!(!state.db.is_admin(bob.sub).unwrap());

        let Json(log) = moderation_log(State(state)).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].shape, EntryShape::Finalization);
        assert_eq!(log[0].entry.action, ActionKind::AdminDemote);
        assert_eq!(log[0].entry.acting_name, "alice");
        assert_eq!(log[0].entry.recipient_name.as_deref(), Some("bob"));
        assert_eq!(log[0].entry.quorum_name.as_deref(), Some("carol"));
        assert_eq!(log[0].entry.quorum_decision, Some(true));
        assert_eq!(log[1].entry.action, ActionKind::ProposeDemoteAdmin);
    }

    #[tokio::test]
    async fn admin_issued_credentials_log_in() {
        let state = state();
        let alice = admin(&state, "alice");

        let (code, Json(created)) =
            add_user(State(state.clone()), Extension(alice.clone()), req("newbie"))
                .await
                .unwrap();
        assert_eq!(code, StatusCode::CREATED);

        let Json(reset) =
            reset_password(State(state.clone()), Extension(alice.clone()), req("newbie"))
                .await
                .unwrap();
        assert_eq!(reset.user_id, created.user_id);
        assert_ne!(reset.password, created.password);

        let login_as = |password: String| {
            Json(LoginRequest {
                username: "newbie".to_string(),
                password,
            })
        };
        assert_eq!(
            login(State(state.clone()), login_as(created.password)).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
        let Json(logged_in) = login(State(state.clone()), login_as(reset.password)).await.unwrap();
        assert_eq!(logged_in.user_id, created.user_id);

        let err = add_user(State(state.clone()), Extension(alice), req("newbie"))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::CONFLICT);

        let actions: Vec<_> = state.db.get_logs().unwrap().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![ActionKind::ResetPw, ActionKind::AdminAddUser]);
    }

    #[tokio::test]
    async fn admins_listing_reports_quorum() {
        let state = state();
        admin(&state, "carol");
        admin(&state, "alice");

        let Json(resp) = admins(State(state)).await.unwrap();
        assert!(resp.quorum_active);
        let names: Vec<_> = resp.admins.into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["alice", "carol"]);
    }
}
