//! `POST /api/admin/promote`: find the entry immediately preceding
//! `RefName` in the configured promotions list and hand the pair off to
//! the engine's promotion channel.
//!
//! Mirrors the original's index walk exactly: the target is
//! `Promotions[i - 1]` where `Promotions[i] == RefName`. Neither a missing
//! `RefName` nor `RefName` being the first (0th) entry has a valid
//! predecessor, so both are rejected the same way.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use gitdeploy_engine::PromotionRequest;
use gitdeploy_types::GitRef;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PromoteResponse {
    success: bool,
    promote_to: String,
}

pub async fn promote(
    State(state): State<AppState>,
    Json(git_ref): Json<GitRef>,
) -> Result<Json<PromoteResponse>, AppError> {
    let promote_to = promotion_target(&state.config.promotions, &git_ref.ref_name)
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "E_PARSE", "invalid promotion"))?;

    let _ = state
        .engine
        .promotions_tx
        .send(PromotionRequest {
            git_ref,
            promote_to: promote_to.clone(),
        })
        .await;

    Ok(Json(PromoteResponse { success: true, promote_to }))
}

fn promotion_target(promotions: &[String], ref_name: &str) -> Option<String> {
    let i = promotions.iter().position(|p| p == ref_name)?;
    if i == 0 {
        return None;
    }
    Some(promotions[i - 1].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_target_is_the_preceding_entry() {
        let promotions = vec!["production".to_string(), "staging".to_string(), "master".to_string()];
        assert_eq!(promotion_target(&promotions, "master"), Some("staging".to_string()));
        assert_eq!(promotion_target(&promotions, "staging"), Some("production".to_string()));
    }

    #[test]
    fn promotion_target_rejects_first_entry_and_unknown_ref() {
        let promotions = vec!["production".to_string(), "staging".to_string(), "master".to_string()];
        assert_eq!(promotion_target(&promotions, "production"), None);
        assert_eq!(promotion_target(&promotions, "nightly"), None);
    }
}
