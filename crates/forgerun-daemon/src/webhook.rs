//! Pure helpers for the webhook ingress contract (§4.4): signature
//! verification, delivery-id synthesis, and extraction of `(owner, repo)`
//! and PR numbers from a GitHub webhook payload. Kept free of IO so the
//! dispatch rules are unit-testable without a database or HTTP server.

use forgerun_schemas::EventType;
use hex::ToHex;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub fn sha256_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.finalize().encode_hex()
}

/// Verifies `X-Hub-Signature-256: sha256=<hex>` in constant time.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed.ct_eq(&expected).into()
}

/// Deterministic delivery id when `X-GitHub-Delivery` is absent, derived
/// from the event type and body hash so retried requests with the same
/// body collapse under replay defense rather than minting a fresh row.
pub fn synthesize_delivery_id(event_type: &str, body: &[u8]) -> String {
    let basis = format!("{event_type}:{}", sha256_hex(body));
    Uuid::new_v5(&Uuid::NAMESPACE_OID, basis.as_bytes()).to_string()
}

/// Extracts `(owner, repo)` from `repository.owner.login`/`.name` and
/// `repository.name`.
pub fn extract_owner_repo(payload: &Value) -> Option<(String, String)> {
    let repository = payload.get("repository")?;
    let repo = repository.get("name")?.as_str()?.to_string();
    let owner_obj = repository.get("owner")?;
    let owner = owner_obj
        .get("login")
        .and_then(Value::as_str)
        .or_else(|| owner_obj.get("name").and_then(Value::as_str))?
        .to_string();
    Some((owner, repo))
}

/// Extracts the PR numbers a webhook delivery concerns (§4.4 step 7).
pub fn extract_pr_numbers(event_type: &str, payload: &Value) -> Vec<i64> {
    match event_type {
        "pull_request" | "pull_request_review" => payload
            .get("pull_request")
            .and_then(|pr| pr.get("number"))
            .and_then(Value::as_i64)
            .into_iter()
            .collect(),
        "issue_comment" => {
            let issue = match payload.get("issue") {
                Some(i) => i,
                None => return Vec::new(),
            };
            if issue.get("pull_request").is_some() {
                issue
                    .get("number")
                    .and_then(Value::as_i64)
                    .into_iter()
                    .collect()
            } else {
                Vec::new()
            }
        }
        "check_suite" | "check_run" => {
            let key = if event_type == "check_suite" { "check_suite" } else { "check_run" };
            payload
                .get(key)
                .and_then(|v| v.get("pull_requests"))
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|pr| pr.get("number").and_then(Value::as_i64)).collect())
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// The action a per-PR dispatch resolves to (§4.4 step 8). `None` covers
/// every case the step doesn't drive a transition for, including review
/// states other than `changes_requested` and `pull_request` events (the
/// `action=synchronize` case explicitly stays unresolved per §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Review(&'static str),
    Check(&'static str),
    None,
}

const FAILURE_CONCLUSIONS: &[&str] =
    &["failure", "timed_out", "cancelled", "action_required", "startup_failure"];
const SUCCESS_CONCLUSIONS: &[&str] = &["success", "neutral", "skipped"];

/// Derives the dispatch action for one `(event_type, payload)` pair.
pub fn derive_action(event_type: &str, payload: &Value) -> Action {
    match event_type {
        "pull_request_review" => {
            let state = payload.get("review").and_then(|r| r.get("state")).and_then(Value::as_str);
            if state == Some("changes_requested") {
                Action::Review("changes_requested")
            } else {
                Action::None
            }
        }
        "check_suite" | "check_run" => {
            let key = if event_type == "check_suite" { "check_suite" } else { "check_run" };
            let node = match payload.get(key) {
                Some(n) => n,
                None => return Action::None,
            };
            let conclusion = node.get("conclusion").and_then(Value::as_str);
            match conclusion {
                Some(c) if SUCCESS_CONCLUSIONS.contains(&c) => Action::Check("success"),
                Some(c) if FAILURE_CONCLUSIONS.contains(&c) => Action::Check("failure"),
                _ => Action::None,
            }
        }
        _ => Action::None,
    }
}

/// Maps an [`Action`] to the coordinator event type, payload, and the
/// idempotency-key components (`kind`, `value`) §4.4 step 8 specifies.
pub fn action_to_event(action: &Action) -> Option<(EventType, Value, &'static str, &'static str)> {
    match action {
        Action::Review(state) => Some((
            EventType::GithubReviewSubmitted,
            serde_json::json!({ "state": state }),
            "review",
            state,
        )),
        Action::Check(conclusion) => Some((
            EventType::GithubCheckCompleted,
            serde_json::json!({ "conclusion": conclusion }),
            "check",
            conclusion,
        )),
        Action::None => None,
    }
}

/// `gh-webhook:<delivery>:<event>:<pr>:<index>:<kind>:<value>` (§4.4 step 8).
pub fn idempotency_key(
    delivery: &str,
    event_type: &str,
    pr_number: i64,
    index: usize,
    kind: &str,
    value: &str,
) -> String {
    format!("gh-webhook:{delivery}:{event_type}:{pr_number}:{index}:{kind}:{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_round_trips() {
        let secret = "shh";
        let body = b"{\"a\":1}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = mac.finalize().into_bytes();
        let header = format!("sha256={}", hex::encode(digest));
        assert!(verify_signature(secret, body, &header));
    }

    #[test]
    fn signature_rejects_wrong_secret() {
        let header = format!("sha256={}", "00".repeat(32));
        assert!(!verify_signature("real-secret", b"{}", &header));
    }

    #[test]
    fn signature_rejects_missing_prefix() {
        assert!(!verify_signature("s", b"{}", &hex::encode([0u8; 32])));
    }

    #[test]
    fn extract_owner_repo_reads_login() {
        let payload = json!({"repository": {"name": "widgets", "owner": {"login": "acme"}}});
        assert_eq!(extract_owner_repo(&payload), Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn extract_owner_repo_falls_back_to_owner_name() {
        let payload = json!({"repository": {"name": "widgets", "owner": {"name": "acme-org"}}});
        assert_eq!(extract_owner_repo(&payload), Some(("acme-org".to_string(), "widgets".to_string())));
    }

    #[test]
    fn extract_owner_repo_missing_is_none() {
        assert_eq!(extract_owner_repo(&json!({})), None);
    }

    #[test]
    fn pr_numbers_from_pull_request_review() {
        let payload = json!({"pull_request": {"number": 7}});
        assert_eq!(extract_pr_numbers("pull_request_review", &payload), vec![7]);
    }

    #[test]
    fn pr_numbers_from_issue_comment_requires_pull_request_marker() {
        let on_pr = json!({"issue": {"number": 9, "pull_request": {}}});
        assert_eq!(extract_pr_numbers("issue_comment", &on_pr), vec![9]);

        let not_pr = json!({"issue": {"number": 9}});
        assert!(extract_pr_numbers("issue_comment", &not_pr).is_empty());
    }

    #[test]
    fn pr_numbers_from_check_suite_list() {
        let payload = json!({"check_suite": {"pull_requests": [{"number": 1}, {"number": 2}]}});
        assert_eq!(extract_pr_numbers("check_suite", &payload), vec![1, 2]);
    }

    #[test]
    fn derive_action_review_changes_requested() {
        let payload = json!({"review": {"state": "changes_requested"}});
        assert_eq!(derive_action("pull_request_review", &payload), Action::Review("changes_requested"));
    }

    #[test]
    fn derive_action_review_other_states_are_none() {
        let payload = json!({"review": {"state": "approved"}});
        assert_eq!(derive_action("pull_request_review", &payload), Action::None);
    }

    #[test]
    fn derive_action_check_success_conclusions() {
        for c in ["success", "neutral", "skipped"] {
            let payload = json!({"check_suite": {"conclusion": c}});
            assert_eq!(derive_action("check_suite", &payload), Action::Check("success"));
        }
    }

    #[test]
    fn derive_action_check_failure_conclusions() {
        for c in ["failure", "timed_out", "cancelled", "action_required", "startup_failure"] {
            let payload = json!({"check_run": {"conclusion": c}});
            assert_eq!(derive_action("check_run", &payload), Action::Check("failure"));
        }
    }

    #[test]
    fn derive_action_check_pending_is_none() {
        let payload = json!({"check_suite": {"status": "in_progress"}});
        assert_eq!(derive_action("check_suite", &payload), Action::None);
    }

    #[test]
    fn derive_action_pull_request_synchronize_is_none() {
        let payload = json!({"action": "synchronize"});
        assert_eq!(derive_action("pull_request", &payload), Action::None);
    }

    #[test]
    fn idempotency_key_matches_documented_shape() {
        let key = idempotency_key("d1", "github.check.completed", 42, 0, "check", "success");
        assert_eq!(key, "gh-webhook:d1:github.check.completed:42:0:check:success");
    }
}
