//! Caller identity and workspace access checks.
//!
//! Credential verification is an outer concern: by the time a request reaches
//! these handlers its `X-User-Id` header is assumed to name an authenticated
//! user. Everything here only resolves that identity and decides what it may
//! touch.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::api::{ApiError, SharedState};
use super::db::BoardDb;
use super::models::{User, Workspace};
use crate::errors::{BoardError, BoardResult};

pub const USER_HEADER: &str = "x-user-id";

/// Required level of access to a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Any member (owner, admin or member) may read and edit tasks.
    Member,
    /// Only the owner manages the workspace itself and its membership.
    Owner,
}

/// The authenticated user making the request.
#[derive(Debug, Clone)]
pub struct Caller(pub User);

impl Caller {
    pub fn id(&self) -> &str {
        &self.0.id
    }
}

impl FromRequestParts<SharedState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| BoardError::Unauthorized(format!("missing {} header", USER_HEADER)))?
            .to_string();

        let user = state.db.call(move |db| resolve_user(db, &user_id)).await?;
        Ok(Caller(user))
    }
}

pub fn resolve_user(db: &BoardDb, user_id: &str) -> BoardResult<User> {
    db.get_user(user_id)?
        .ok_or_else(|| BoardError::Unauthorized(format!("unknown user {}", user_id)))
}

/// Load a workspace and check that `user_id` holds `access` on it.
pub fn require_access(db: &BoardDb, workspace_id: &str, user_id: &str, access: Access) -> BoardResult<Workspace> {
    let workspace = db
        .get_workspace(workspace_id)?
        .ok_or_else(|| BoardError::not_found("Workspace", workspace_id))?;
    check_access(&workspace, user_id, access)?;
    Ok(workspace)
}

pub fn check_access(workspace: &Workspace, user_id: &str, access: Access) -> BoardResult<()> {
    let allowed = match access {
        Access::Member => workspace.is_member(user_id),
        Access::Owner => workspace.owner_id == user_id,
    };
    if allowed {
        Ok(())
    } else {
        let needed = match access {
            Access::Member => "a member",
            Access::Owner => "the owner",
        };
        Err(BoardError::Forbidden(format!(
            "user {} is not {} of workspace {}",
            user_id, needed, workspace.id
        )))
    }
}
