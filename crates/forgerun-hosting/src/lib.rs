//! Hosting-service client (§6: "hosting-service client: `fetchPullRequestView`
//! (owner, repo, pr_number) → json"). A thin GraphQL client against GitHub's
//! API, returning the raw decoded `pullRequest` object as JSON; parsing it
//! into `forgerun_sync::PrView` is left to the caller, keeping this crate
//! ignorant of the synchronization engine's internal types.
//!
//! Defensive posture (redirect rejection, response byte cap, per-request
//! timeout, host allowlisting) follows the pack's HTTP source implementation.

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::Client;
use serde_json::Value;

/// Default response byte cap. A PR view payload is a few KB of JSON; this is
/// generous headroom without being unbounded.
const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_BASE_URL: &str = "https://api.github.com/graphql";

const PR_VIEW_QUERY: &str = r#"
query($owner: String!, $repo: String!, $number: Int!) {
  repository(owner: $owner, name: $repo) {
    pullRequest(number: $number) {
      number
      reviewDecision
      statusCheckRollup: commits(last: 1) {
        nodes {
          commit {
            statusCheckRollup {
              contexts(first: 100) {
                nodes {
                  ... on CheckRun { conclusion state: status }
                  ... on StatusContext { state }
                }
              }
            }
          }
        }
      }
      reviews(first: 100) {
        nodes { state }
      }
    }
  }
}
"#;

#[derive(Debug, thiserror::Error)]
pub enum HostingError {
    #[error("host not allowed: {0}")]
    HostNotAllowed(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response exceeded {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
    #[error("response was not valid JSON: {0}")]
    InvalidJson(serde_json::Error),
    #[error("graphql errors: {0}")]
    GraphQl(String),
    #[error("pull request not found: {owner}/{repo}#{pr_number}")]
    NotFound {
        owner: String,
        repo: String,
        pr_number: i64,
    },
}

/// GitHub GraphQL client for the PR-view synchronization contract.
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GithubClient {
    /// Builds a client with redirects rejected and a fixed request timeout,
    /// matching the pack's defensive HTTP-source posture.
    pub fn new(token: impl Into<String>) -> Result<Self, HostingError> {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// As [`GithubClient::new`] but against a caller-supplied GraphQL
    /// endpoint, for testing against a local mock server.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self, HostingError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    /// Fetches the PR view payload for `owner/repo#pr_number`.
    ///
    /// Returns the decoded `pullRequest` object verbatim as JSON, in the
    /// shape `forgerun_sync::PrView` expects (`statusCheckRollup`,
    /// `reviewDecision`, `reviews`).
    pub async fn fetch_pull_request_view(
        &self,
        owner: &str,
        repo: &str,
        pr_number: i64,
    ) -> Result<Value, HostingError> {
        enforce_host_allowlist(&self.base_url)?;

        let body = serde_json::json!({
            "query": PR_VIEW_QUERY,
            "variables": { "owner": owner, "repo": repo, "number": pr_number },
        });

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .header("User-Agent", "forgerun-hosting")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let bytes = read_capped(response).await?;
        let envelope: Value = serde_json::from_slice(&bytes).map_err(HostingError::InvalidJson)?;

        if let Some(errors) = envelope.get("errors").filter(|e| !e.is_null()) {
            return Err(HostingError::GraphQl(errors.to_string()));
        }

        let pull_request = envelope
            .pointer("/data/repository/pullRequest")
            .cloned()
            .filter(|v| !v.is_null());

        pull_request.ok_or_else(|| HostingError::NotFound {
            owner: owner.to_string(),
            repo: repo.to_string(),
            pr_number,
        })
    }
}

async fn read_capped(response: reqwest::Response) -> Result<Vec<u8>, HostingError> {
    if let Some(len) = response.content_length() {
        if len as usize > MAX_RESPONSE_BYTES {
            return Err(HostingError::TooLarge {
                max_bytes: MAX_RESPONSE_BYTES,
            });
        }
    }
    let bytes = response.bytes().await?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(HostingError::TooLarge {
            max_bytes: MAX_RESPONSE_BYTES,
        });
    }
    Ok(bytes.to_vec())
}

fn enforce_host_allowlist(url: &str) -> Result<(), HostingError> {
    let host = url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("");
    if host == "api.github.com" || host.ends_with(".githubusercontent.com") {
        Ok(())
    } else {
        Err(HostingError::HostNotAllowed(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_accepts_the_github_graphql_host() {
        assert!(enforce_host_allowlist("https://api.github.com/graphql").is_ok());
    }

    #[test]
    fn allowlist_rejects_an_arbitrary_host() {
        let err = enforce_host_allowlist("https://evil.example.com/graphql").unwrap_err();
        assert!(matches!(err, HostingError::HostNotAllowed(_)));
    }

    #[tokio::test]
    async fn client_construction_rejects_redirects_by_policy() {
        // Construction itself never redirects; this just asserts the client
        // builds successfully with the redirect-rejecting policy in place.
        let client = GithubClient::new("token").unwrap();
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }
}
