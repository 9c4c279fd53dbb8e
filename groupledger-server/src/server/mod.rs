mod acl;
pub mod auth;
mod config;

use crate::ledger::{ClaimDetail, GradeOutcome, LedgerError, NewAuctionSpec, NewTaskSpec};
use crate::notify::Notifications;
use crate::server::auth::AuthCtx;
use crate::storage::Store;
use crate::storage::models::{Auction, Bid, Task};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{Method, StatusCode, header},
    routing::{delete, get, post},
};
use chrono::NaiveDateTime;
pub use config::{AppConfig, ConfigError, SweeperConfig};
use groupledger_shared::api::{self, LedgerEvent};
use groupledger_shared::domain::{Decision, Status};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub notifications: Notifications,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store, notifications: Notifications) -> Self {
        Self {
            config,
            store,
            notifications,
        }
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/groups/{group}/balance", get(api_balance))
        .route("/api/v1/groups/{group}/members", get(api_list_members))
        .route(
            "/api/v1/groups/{group}/tasks",
            get(api_list_tasks).post(api_create_task),
        )
        .route("/api/v1/groups/{group}/tasks/{task}", delete(api_delete_task))
        .route("/api/v1/groups/{group}/tasks/{task}/claim", post(api_claim))
        .route(
            "/api/v1/groups/{group}/tasks/{task}/claims",
            get(api_task_claims),
        )
        .route(
            "/api/v1/groups/{group}/claims/{claim}/unclaim",
            post(api_unclaim),
        )
        .route("/api/v1/groups/{group}/claims/{claim}/submit", post(api_submit))
        .route(
            "/api/v1/groups/{group}/submissions/{submission}/grade",
            post(api_grade),
        )
        .route(
            "/api/v1/groups/{group}/auctions",
            get(api_list_auctions).post(api_create_auction),
        )
        .route(
            "/api/v1/groups/{group}/auctions/{auction}",
            delete(api_delete_auction),
        )
        .route(
            "/api/v1/groups/{group}/auctions/{auction}/bids",
            get(api_list_bids).post(api_place_bid),
        )
        .route(
            "/api/v1/groups/{group}/auctions/{auction}/winner",
            get(api_auction_winner),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            acl::enforce_acl,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .layer(middleware::from_fn(set_auth_span_fields));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            user_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    // Ledger responses are per-user and change on every write
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
    );

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        Span::current().record("user_id", tracing::field::display(&auth.user_id));
    }
    Ok(next.run(req).await)
}

fn rfc3339(dt: NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

fn parse_time(field: &str, raw: &str) -> Result<NaiveDateTime, AppError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .map_err(|_| AppError::bad_request(format!("{field}: expected an RFC 3339 timestamp")))
}

fn task_dto(t: Task) -> api::TaskDto {
    api::TaskDto {
        id: t.id,
        name: t.name,
        points: t.points,
        quantity: t.quantity,
        due_date: t.due_date.map(rfc3339),
        status: t.status.parse().unwrap_or(Status::Inactive),
    }
}

fn claim_dto(d: ClaimDetail) -> api::ClaimDto {
    api::ClaimDto {
        claim_id: d.claim.id,
        claimant_id: d.claim.claimant_id,
        claimed_at: rfc3339(d.claim.claimed_at),
        released_at: d.claim.released_at.map(rfc3339),
        submission: d.submission.map(|s| api::SubmissionDto {
            submission_id: s.id,
            author_id: s.author_id,
            co_author_id: s.co_author_id,
            submitted_at: rfc3339(s.submitted_at),
        }),
        review: d.review.and_then(|r| {
            Some(api::ReviewDto {
                decision: r.decision.parse().ok()?,
                reviewer_id: r.reviewer_id,
                reviewed_at: rfc3339(r.reviewed_at),
            })
        }),
    }
}

fn bid_dto(b: Bid) -> api::BidDto {
    api::BidDto {
        bid_id: b.id,
        bidder_id: b.bidder_id,
        amount: b.amount,
        bid_time: rfc3339(b.bid_time),
    }
}

fn auction_dto(a: Auction) -> api::AuctionDto {
    api::AuctionDto {
        id: a.id,
        reward_name: a.reward_name,
        start_time: rfc3339(a.start_time),
        end_time: rfc3339(a.end_time),
        minimum_bid: a.minimum_bid,
        bid_increment: a.bid_increment,
        status: a.status.parse().unwrap_or(Status::Inactive),
    }
}

async fn api_balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(group): Path<String>,
) -> Result<Json<api::BalanceDto>, AppError> {
    let points = state.store.get_balance(&auth.user_id, &group).await?;
    Ok(Json(api::BalanceDto {
        group_id: group,
        user_id: auth.user_id,
        points,
    }))
}

async fn api_list_members(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<Vec<api::MemberDto>>, AppError> {
    let rows = state.store.list_members(&group).await?;
    Ok(Json(
        rows.into_iter()
            .map(|m| api::MemberDto {
                user_id: m.user_id,
                points: m.points,
            })
            .collect(),
    ))
}

async fn api_list_tasks(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<Vec<api::TaskDto>>, AppError> {
    let rows = state.store.list_active_tasks(&group).await?;
    Ok(Json(rows.into_iter().map(task_dto).collect()))
}

async fn api_create_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(group): Path<String>,
    Json(body): Json<api::CreateTaskReq>,
) -> Result<(StatusCode, Json<api::TaskDto>), AppError> {
    let due_date = body
        .due_date
        .as_deref()
        .map(|s| parse_time("due_date", s))
        .transpose()?;
    let spec = NewTaskSpec {
        name: body.name,
        points: body.points,
        difficulty: body.difficulty,
        quantity: body.quantity,
        due_date,
    };
    let task = state.store.create_task(&group, &auth.user_id, spec).await?;
    Ok((StatusCode::CREATED, Json(task_dto(task))))
}

async fn api_delete_task(
    State(state): State<AppState>,
    Path((group, task)): Path<(String, i32)>,
) -> Result<StatusCode, AppError> {
    state.store.delete_task(&group, task).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_task_claims(
    State(state): State<AppState>,
    Path((group, task)): Path<(String, i32)>,
) -> Result<Json<api::TaskClaimsDto>, AppError> {
    let row = state.store.get_task(&group, task).await?;
    let claims = state.store.task_claims(&group, task).await?;
    Ok(Json(api::TaskClaimsDto {
        task: task_dto(row),
        claims: claims.into_iter().map(claim_dto).collect(),
    }))
}

async fn api_claim(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path((group, task)): Path<(String, i32)>,
) -> Result<(StatusCode, Json<api::ClaimResp>), AppError> {
    let claim_id = state.store.claim(task, &group, &auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(api::ClaimResp { claim_id })))
}

async fn api_unclaim(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path((_group, claim)): Path<(String, i32)>,
) -> Result<Json<api::ClaimResp>, AppError> {
    state.store.unclaim(claim, &auth.user_id).await?;
    Ok(Json(api::ClaimResp { claim_id: claim }))
}

async fn api_submit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path((group, claim)): Path<(String, i32)>,
    Json(body): Json<api::SubmitReq>,
) -> Result<(StatusCode, Json<api::SubmitResp>), AppError> {
    let outcome = state
        .store
        .submit(&group, claim, &auth.user_id, body.co_author_id.as_deref())
        .await?;
    let awarded = match &outcome.auto_graded {
        Some(graded) => {
            notify_graded(&state, graded);
            graded.awarded
        }
        None => 0,
    };
    Ok((
        StatusCode::CREATED,
        Json(api::SubmitResp {
            submission_id: outcome.submission_id,
            auto_approved: outcome.auto_graded.is_some(),
            awarded,
        }),
    ))
}

fn notify_graded(state: &AppState, outcome: &GradeOutcome) {
    for (user_id, balance) in &outcome.recipients {
        state.notifications.dispatch_event(
            state.store.clone(),
            LedgerEvent::SubmissionGraded {
                user_id: user_id.clone(),
                group_id: outcome.group_id.clone(),
                submission_id: outcome.submission_id,
                accepted: outcome.decision == Decision::Accept,
                awarded: outcome.awarded,
                balance: *balance,
            },
        );
    }
}

async fn api_grade(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path((group, submission)): Path<(String, i32)>,
    Json(body): Json<api::GradeReq>,
) -> Result<Json<api::GradeResp>, AppError> {
    let outcome = state
        .store
        .grade_submission(&group, submission, &auth.user_id, body.decision)
        .await?;
    notify_graded(&state, &outcome);
    Ok(Json(api::GradeResp {
        decision: outcome.decision,
        awarded: outcome.awarded,
    }))
}

async fn api_list_auctions(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<Vec<api::AuctionDto>>, AppError> {
    let rows = state.store.list_active_auctions(&group).await?;
    Ok(Json(rows.into_iter().map(auction_dto).collect()))
}

async fn api_create_auction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(group): Path<String>,
    Json(body): Json<api::CreateAuctionReq>,
) -> Result<(StatusCode, Json<api::AuctionDto>), AppError> {
    let start_time = body
        .start_time
        .as_deref()
        .map(|s| parse_time("start_time", s))
        .transpose()?;
    let spec = NewAuctionSpec {
        reward_name: body.reward_name,
        start_now: body.start_now,
        start_time,
        end_time: parse_time("end_time", &body.end_time)?,
        minimum_bid: body.minimum_bid,
        bid_increment: body.bid_increment,
    };
    let auction = state
        .store
        .create_auction(&group, &auth.user_id, spec)
        .await?;
    Ok((StatusCode::CREATED, Json(auction_dto(auction))))
}

async fn api_delete_auction(
    State(state): State<AppState>,
    Path((group, auction)): Path<(String, i32)>,
) -> Result<StatusCode, AppError> {
    state.store.delete_auction(&group, auction).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_list_bids(
    State(state): State<AppState>,
    Path((group, auction)): Path<(String, i32)>,
) -> Result<Json<api::AuctionBidsDto>, AppError> {
    let row = state.store.get_auction(&group, auction).await?;
    let bids = state.store.list_bids(&group, auction).await?;
    Ok(Json(api::AuctionBidsDto {
        auction: auction_dto(row),
        bids: bids.into_iter().map(bid_dto).collect(),
    }))
}

async fn api_place_bid(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path((group, auction)): Path<(String, i32)>,
    Json(body): Json<api::BidReq>,
) -> Result<(StatusCode, Json<api::BidResp>), AppError> {
    let bid_id = state
        .store
        .place_bid(auction, &group, &auth.user_id, body.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(api::BidResp { bid_id })))
}

async fn api_auction_winner(
    State(state): State<AppState>,
    Path((group, auction)): Path<(String, i32)>,
) -> Result<Json<api::AuctionWinnerDto>, AppError> {
    let w = state.store.get_auction_winner(&group, auction).await?;
    Ok(Json(api::AuctionWinnerDto {
        auction_id: w.auction_id,
        winner_id: w.winner_id,
        winning_bid: w.winning_bid,
        finalized_at: rfc3339(w.finalized_at),
    }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    /// A ledger rule rejected the request.
    Ledger {
        status: StatusCode,
        kind: &'static str,
        message: String,
    },
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::Storage(_) => return AppError::internal(&err),
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::NotAMember => StatusCode::FORBIDDEN,
            LedgerError::NotOpen(_)
            | LedgerError::Expired
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::BidTooLow { .. }
            | LedgerError::NoActiveClaim
            | LedgerError::Invalid(_) => StatusCode::BAD_REQUEST,
            LedgerError::AlreadyHighestBidder
            | LedgerError::AlreadyClaimed
            | LedgerError::ConflictRetryHigher
            | LedgerError::Unavailable
            | LedgerError::AlreadySubmitted
            | LedgerError::AlreadyGraded => StatusCode::CONFLICT,
        };
        AppError::Ledger {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::Ledger {
                status,
                kind,
                message,
            } => (status, message, kind, None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request rejected");
        }
        let body = axum::Json(ErrorBody { error: msg, kind });
        (status, body).into_response()
    }
}
