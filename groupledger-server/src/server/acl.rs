use super::{AppError, AppState, auth::AuthCtx};
use crate::ledger::MemberAccess;
use axum::response::Response;
use axum::{
    extract::{OriginalUri, State},
    http::{Method, Request},
    middleware::Next,
};
use percent_encoding::percent_decode_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Required {
    Member,
    Admin,
}

pub async fn enforce_acl(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };

    let segs = segmented(&path);
    let (group_id, rest) = match segs.as_slice() {
        ["api", "v1", "groups", group, rest @ ..] => (decode(group), rest),
        _ => {
            tracing::warn!(?segs, "ACL: path outside group scope");
            return Err(AppError::forbidden());
        }
    };

    let Some(required) = required_access(&method, rest) else {
        tracing::warn!(
            method = %method,
            path = %path,
            user_id = %auth.user_id,
            "ACL: no rule matched; denying"
        );
        return Err(AppError::forbidden());
    };

    let access = state
        .store
        .member_access(&group_id, &auth.user_id)
        .await
        .map_err(AppError::internal)?;
    let allowed = match (required, access) {
        (_, MemberAccess::Admin) => true,
        (Required::Member, MemberAccess::Member) => true,
        _ => false,
    };
    if !allowed {
        tracing::warn!(
            method = %method,
            path = %path,
            user_id = %auth.user_id,
            group_id = %group_id,
            required = ?required,
            access = ?access,
            "ACL: insufficient group access"
        );
        return Err(AppError::forbidden());
    }

    Ok(next.run(req).await)
}

fn required_access(method: &Method, rest: &[&str]) -> Option<Required> {
    let is_id = |s: &&str| s.parse::<i32>().is_ok();
    match rest {
        ["balance"] if *method == Method::GET => Some(Required::Member),
        ["members"] if *method == Method::GET => Some(Required::Admin),
        ["tasks"] if *method == Method::GET => Some(Required::Member),
        ["tasks"] if *method == Method::POST => Some(Required::Admin),
        ["tasks", id] if *method == Method::DELETE && is_id(id) => Some(Required::Admin),
        ["tasks", id, "claim"] if *method == Method::POST && is_id(id) => Some(Required::Member),
        ["tasks", id, "claims"] if *method == Method::GET && is_id(id) => Some(Required::Admin),
        ["claims", id, action]
            if *method == Method::POST
                && (action == &"unclaim" || action == &"submit")
                && is_id(id) =>
        {
            Some(Required::Member)
        }
        ["submissions", id, "grade"] if *method == Method::POST && is_id(id) => {
            Some(Required::Admin)
        }
        ["auctions"] if *method == Method::GET => Some(Required::Member),
        ["auctions"] if *method == Method::POST => Some(Required::Admin),
        ["auctions", id] if *method == Method::DELETE && is_id(id) => Some(Required::Admin),
        ["auctions", id, "bids"]
            if (*method == Method::GET || *method == Method::POST) && is_id(id) =>
        {
            Some(Required::Member)
        }
        ["auctions", id, "winner"] if *method == Method::GET && is_id(id) => {
            Some(Required::Member)
        }
        _ => None,
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}
