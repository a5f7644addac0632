//! Inbound webhook adapters for GitHub, Gitea, and Bitbucket.
//!
//! Each adapter is a small axum `Router` that verifies the provider's
//! signature over the raw request body, decodes the push payload into
//! [`gitdeploy_git::RawRef`]s, normalizes them, and forwards the result
//! onto the engine's intake channel. A failed signature check or an
//! unparseable body never reaches the channel — the handler answers
//! 400/401 directly.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tracing::{info, warn};

use gitdeploy_git::{normalize, RawRef};
use gitdeploy_types::GitRef;

type HmacSha256 = Hmac<Sha256>;

/// Compare `header_value` (optionally `prefix`-qualified, e.g. `sha256=`)
/// against the hex-encoded HMAC-SHA256 of `body` under `secret`, in
/// constant time.
fn verify_hmac_sha256(secret: &str, body: &[u8], header_value: &str, prefix: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix(prefix) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    bool::from(expected.as_bytes().ct_eq(hex_sig.as_bytes()))
}

fn bad_request(message: &str) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({"success": false, "message": message}))).into_response()
}

fn unauthorized(message: &str) -> axum::response::Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"success": false, "message": message}))).into_response()
}

fn accepted() -> axum::response::Response {
    (StatusCode::OK, Json(json!({"success": true}))).into_response()
}

async fn forward(intake_tx: &mpsc::Sender<GitRef>, git_ref: GitRef) {
    info!(repo_id = %git_ref.repo_id, ref_name = %git_ref.ref_name, "webhook.accepted");
    if intake_tx.send(git_ref).await.is_err() {
        warn!("webhook: intake channel closed, dropping accepted push");
    }
}

/// Splits a GitHub/Gitea-style `refs/heads/<name>` or `refs/tags/<name>`
/// ref string into (`ref_type` token, `ref_name`).
fn split_ref(r#ref: &str) -> (&'static str, &str) {
    if let Some(name) = r#ref.strip_prefix("refs/heads/") {
        ("heads", name)
    } else if let Some(name) = r#ref.strip_prefix("refs/tags/") {
        ("tags", name)
    } else {
        ("", r#ref)
    }
}

// ---------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GithubPush {
    r#ref: String,
    after: String,
    repository: GithubRepository,
}

#[derive(Debug, Deserialize)]
struct GithubRepository {
    clone_url: String,
    ssh_url: String,
    name: String,
    owner: GithubOwner,
}

#[derive(Debug, Deserialize)]
struct GithubOwner {
    login: Option<String>,
    name: Option<String>,
}

fn decode_github_push(body: &[u8]) -> Option<RawRef> {
    let push: GithubPush = serde_json::from_slice(body).ok()?;
    let (ref_type, ref_name) = split_ref(&push.r#ref);
    Some(RawRef {
        https_url: push.repository.clone_url,
        ssh_url: push.repository.ssh_url,
        rev: push.after,
        r#ref: push.r#ref.clone(),
        ref_type: ref_type.to_string(),
        ref_name: ref_name.to_string(),
        repo_owner: push.repository.owner.login.or(push.repository.owner.name).unwrap_or_default(),
        repo_name: push.repository.name,
        ..Default::default()
    })
}

#[derive(Clone)]
struct GithubState {
    secret: Arc<str>,
    intake_tx: mpsc::Sender<GitRef>,
}

async fn github_handler(
    State(state): State<GithubState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(signature) = headers.get("X-Hub-Signature-256").and_then(|v| v.to_str().ok()) else {
        return unauthorized("missing X-Hub-Signature-256");
    };
    if !verify_hmac_sha256(&state.secret, &body, signature, "sha256=") {
        return unauthorized("signature mismatch");
    }

    let Some(event) = headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok()) else {
        return bad_request("missing X-GitHub-Event");
    };
    if event != "push" {
        return accepted();
    }

    let Some(raw) = decode_github_push(&body) else {
        return bad_request("unparseable push payload");
    };
    let Some(git_ref) = normalize(raw) else {
        return bad_request("push payload missing clone URL");
    };
    forward(&state.intake_tx, git_ref).await;
    accepted()
}

/// Build a router answering `POST /` for GitHub push webhooks, to be
/// mounted under `/api/webhooks/github`.
pub fn github_router(secret: impl Into<String>, intake_tx: mpsc::Sender<GitRef>) -> Router {
    let state = GithubState {
        secret: Arc::from(secret.into()),
        intake_tx,
    };
    Router::new().route("/", post(github_handler)).with_state(state)
}

// ---------------------------------------------------------------------
// Gitea
// ---------------------------------------------------------------------

// Gitea mirrors GitHub's push payload shape closely enough to share the
// decoder; only the signature header and encoding differ.
type GiteaPush = GithubPush;

#[derive(Clone)]
struct GiteaState {
    secret: Arc<str>,
    intake_tx: mpsc::Sender<GitRef>,
}

async fn gitea_handler(
    State(state): State<GiteaState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(signature) = headers.get("X-Gitea-Signature").and_then(|v| v.to_str().ok()) else {
        return unauthorized("missing X-Gitea-Signature");
    };
    if !verify_hmac_sha256(&state.secret, &body, signature, "") {
        return unauthorized("signature mismatch");
    }

    let push: Option<GiteaPush> = serde_json::from_slice(&body).ok();
    let Some(push) = push else {
        return bad_request("unparseable push payload");
    };
    let (ref_type, ref_name) = split_ref(&push.r#ref);
    let raw = RawRef {
        https_url: push.repository.clone_url,
        ssh_url: push.repository.ssh_url,
        rev: push.after,
        r#ref: push.r#ref.clone(),
        ref_type: ref_type.to_string(),
        ref_name: ref_name.to_string(),
        repo_owner: push.repository.owner.login.or(push.repository.owner.name).unwrap_or_default(),
        repo_name: push.repository.name,
        ..Default::default()
    };
    let Some(git_ref) = normalize(raw) else {
        return bad_request("push payload missing clone URL");
    };
    forward(&state.intake_tx, git_ref).await;
    accepted()
}

/// Build a router answering `POST /` for Gitea push webhooks, to be
/// mounted under `/api/webhooks/gitea`.
pub fn gitea_router(secret: impl Into<String>, intake_tx: mpsc::Sender<GitRef>) -> Router {
    let state = GiteaState {
        secret: Arc::from(secret.into()),
        intake_tx,
    };
    Router::new().route("/", post(gitea_handler)).with_state(state)
}

// ---------------------------------------------------------------------
// Bitbucket
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BitbucketPush {
    push: BitbucketPushInner,
    repository: BitbucketRepository,
}

#[derive(Debug, Deserialize)]
struct BitbucketPushInner {
    changes: Vec<BitbucketChange>,
}

#[derive(Debug, Deserialize)]
struct BitbucketChange {
    new: Option<BitbucketRef>,
}

#[derive(Debug, Deserialize)]
struct BitbucketRef {
    name: String,
    r#type: String,
    target: BitbucketTarget,
}

#[derive(Debug, Deserialize)]
struct BitbucketTarget {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct BitbucketRepository {
    full_name: String,
    links: BitbucketLinks,
}

#[derive(Debug, Deserialize)]
struct BitbucketLinks {
    clone: Vec<BitbucketCloneLink>,
}

#[derive(Debug, Deserialize)]
struct BitbucketCloneLink {
    name: String,
    href: String,
}

fn decode_bitbucket_push(body: &[u8]) -> Option<Vec<RawRef>> {
    let push: BitbucketPush = serde_json::from_slice(body).ok()?;
    let https_url = push
        .repository
        .links
        .clone
        .iter()
        .find(|l| l.name == "https")
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let ssh_url = push
        .repository
        .links
        .clone
        .iter()
        .find(|l| l.name == "ssh")
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let (owner, repo) = push.repository.full_name.split_once('/').unwrap_or(("", &push.repository.full_name));

    let refs: Vec<RawRef> = push
        .push
        .changes
        .into_iter()
        .filter_map(|c| c.new)
        .map(|r| {
            let ref_type = if r.r#type == "tag" { "tags" } else { "heads" };
            RawRef {
                https_url: https_url.clone(),
                ssh_url: ssh_url.clone(),
                rev: r.target.hash,
                r#ref: format!("refs/{ref_type}/{}", r.name),
                ref_type: ref_type.to_string(),
                ref_name: r.name,
                repo_owner: owner.to_string(),
                repo_name: repo.to_string(),
                ..Default::default()
            }
        })
        .collect();
    Some(refs)
}

#[derive(Clone)]
struct BitbucketState {
    secret: Option<Arc<str>>,
    intake_tx: mpsc::Sender<GitRef>,
}

#[derive(Debug, Deserialize)]
struct BitbucketQuery {
    secret: Option<String>,
}

async fn bitbucket_handler(
    State(state): State<BitbucketState>,
    Query(query): Query<BitbucketQuery>,
    body: Bytes,
) -> axum::response::Response {
    if let Some(expected) = &state.secret {
        let provided = query.secret.unwrap_or_default();
        if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            return unauthorized("secret mismatch");
        }
    }

    let Some(raw_refs) = decode_bitbucket_push(&body) else {
        return bad_request("unparseable push payload");
    };
    if raw_refs.is_empty() {
        return accepted();
    }

    for raw in raw_refs {
        match normalize(raw) {
            Some(git_ref) => forward(&state.intake_tx, git_ref).await,
            None => warn!("webhook: bitbucket change missing clone URL, skipping"),
        }
    }
    accepted()
}

/// Build a router answering `POST /` for Bitbucket push webhooks, to be
/// mounted under `/api/webhooks/bitbucket`. `secret`, if set, is checked
/// against the `?secret=` query parameter (Bitbucket Cloud has no HMAC
/// signature header).
pub fn bitbucket_router(secret: Option<String>, intake_tx: mpsc::Sender<GitRef>) -> Router {
    let state = BitbucketState {
        secret: secret.map(|s| Arc::from(s.as_str())),
        intake_tx,
    };
    Router::new().route("/", post(bitbucket_handler)).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn verify_hmac_sha256_accepts_matching_signature() {
        let body = b"hello world";
        let sig = sign("s3cr3t", body);
        assert!(verify_hmac_sha256("s3cr3t", body, &format!("sha256={sig}"), "sha256="));
    }

    #[test]
    fn verify_hmac_sha256_rejects_wrong_secret() {
        let body = b"hello world";
        let sig = sign("s3cr3t", body);
        assert!(!verify_hmac_sha256("wrong", body, &format!("sha256={sig}"), "sha256="));
    }

    #[test]
    fn verify_hmac_sha256_rejects_missing_prefix() {
        let body = b"hello world";
        let sig = sign("s3cr3t", body);
        assert!(!verify_hmac_sha256("s3cr3t", body, &sig, "sha256="));
    }

    #[test]
    fn split_ref_recognizes_branch_and_tag() {
        assert_eq!(split_ref("refs/heads/master"), ("heads", "master"));
        assert_eq!(split_ref("refs/tags/v1.0.0"), ("tags", "v1.0.0"));
        assert_eq!(split_ref("refs/weird/x"), ("", "refs/weird/x"));
    }

    fn github_payload() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ref": "refs/heads/master",
            "after": "abc1234",
            "repository": {
                "clone_url": "https://github.com/acme/widgets.git",
                "ssh_url": "git@github.com:acme/widgets.git",
                "name": "widgets",
                "owner": {"login": "acme", "name": null}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn github_router_accepts_valid_signed_push() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = github_router("s3cr3t", tx);
        let body = github_payload();
        let sig = sign("s3cr3t", &body);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("X-Hub-Signature-256", format!("sha256={sig}"))
                    .header("X-GitHub-Event", "push")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let git_ref = rx.recv().await.expect("forwarded ref");
        assert_eq!(git_ref.ref_name, "master");
        assert_eq!(git_ref.rev, "abc1234");
        assert_eq!(git_ref.owner, "acme");
    }

    #[tokio::test]
    async fn github_router_rejects_bad_signature() {
        let (tx, _rx) = mpsc::channel(1);
        let app = github_router("s3cr3t", tx);
        let body = github_payload();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("X-Hub-Signature-256", "sha256=deadbeef")
                    .header("X-GitHub-Event", "push")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn github_router_ignores_non_push_events() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = github_router("s3cr3t", tx);
        let body = github_payload();
        let sig = sign("s3cr3t", &body);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("X-Hub-Signature-256", format!("sha256={sig}"))
                    .header("X-GitHub-Event", "ping")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bitbucket_router_forwards_each_change() {
        let (tx, mut rx) = mpsc::channel(2);
        let app = bitbucket_router(Some("s3cr3t".to_string()), tx);

        let body = serde_json::to_vec(&json!({
            "push": {
                "changes": [
                    {"new": {"name": "master", "type": "branch", "target": {"hash": "aaa111"}}},
                    {"new": {"name": "v2.0.0", "type": "tag", "target": {"hash": "bbb222"}}},
                ]
            },
            "repository": {
                "full_name": "acme/widgets",
                "links": {
                    "clone": [
                        {"name": "https", "href": "https://bitbucket.org/acme/widgets.git"},
                        {"name": "ssh", "href": "git@bitbucket.org:acme/widgets.git"}
                    ]
                }
            }
        }))
        .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/?secret=s3cr3t")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let first = rx.recv().await.expect("first change");
        let second = rx.recv().await.expect("second change");
        assert_eq!(first.ref_name, "master");
        assert_eq!(second.ref_name, "v2.0.0");
    }

    #[tokio::test]
    async fn bitbucket_router_rejects_wrong_secret() {
        let (tx, _rx) = mpsc::channel(1);
        let app = bitbucket_router(Some("s3cr3t".to_string()), tx);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/?secret=nope")
                    .body(Body::from(b"{}".to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
