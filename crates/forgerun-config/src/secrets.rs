//! Webhook secret resolution. The config stores only the *name* of an
//! environment variable, never a raw value; the value is resolved once at
//! startup and never logged (§10 Configuration: "secrets handling").

use anyhow::{bail, Result};
use serde_json::Value;
use std::env;
use std::fmt;

/// Names of env vars to resolve, read out of the config JSON.
#[derive(Debug, Clone)]
struct SecretEnvNames {
    webhook_secret_var: String,
    github_token_var: Option<String>,
}

fn read_str_at<'a>(config_json: &'a Value, pointer: &str, default: &'a str) -> String {
    config_json
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn read_env_names(config_json: &Value) -> SecretEnvNames {
    SecretEnvNames {
        webhook_secret_var: read_str_at(
            config_json,
            "/ingress/webhook_secret_env",
            "FORGERUN_WEBHOOK_SECRET",
        ),
        github_token_var: config_json
            .pointer("/hosting/github_token_env")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Resolve a named env var. Never logs the value.
fn resolve_env(var_name: &str) -> Option<String> {
    env::var(var_name).ok().filter(|v| !v.is_empty())
}

/// Resolved secret material. `Debug` redacts every field; never print these
/// with `{:?}` expecting to see the underlying value.
#[derive(Clone)]
pub struct ResolvedSecrets {
    pub webhook_secret: Option<String>,
    pub github_token: Option<String>,
}

impl fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "github_token",
                &self.github_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve secrets required by the daemon. A webhook secret is mandatory
/// unless the config explicitly disables signature enforcement
/// (`ingress.require_signature: false`); a hosting token is optional
/// (only needed for higher GitHub API rate limits).
pub fn resolve_secrets(config_json: &Value) -> Result<ResolvedSecrets> {
    let names = read_env_names(config_json);
    let require_signature = config_json
        .pointer("/ingress/require_signature")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let webhook_secret = resolve_env(&names.webhook_secret_var);
    if require_signature && webhook_secret.is_none() {
        bail!(
            "webhook signature enforcement is enabled but env var {} is unset or empty",
            names.webhook_secret_var
        );
    }

    let github_token = names.github_token_var.as_deref().and_then(resolve_env);

    Ok(ResolvedSecrets {
        webhook_secret,
        github_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn debug_never_prints_raw_value() {
        let secrets = ResolvedSecrets {
            webhook_secret: Some("super-secret".to_string()),
            github_token: None,
        };
        let rendered = format!("{secrets:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn missing_required_secret_is_an_error() {
        let cfg = json!({"ingress": {"webhook_secret_env": "FORGERUN_TEST_UNSET_VAR_XYZ"}});
        env::remove_var("FORGERUN_TEST_UNSET_VAR_XYZ");
        let result = resolve_secrets(&cfg);
        assert!(result.is_err());
    }

    #[test]
    fn signature_enforcement_can_be_disabled() {
        let cfg = json!({
            "ingress": {
                "webhook_secret_env": "FORGERUN_TEST_UNSET_VAR_ABC",
                "require_signature": false
            }
        });
        env::remove_var("FORGERUN_TEST_UNSET_VAR_ABC");
        let result = resolve_secrets(&cfg).unwrap();
        assert!(result.webhook_secret.is_none());
    }
}
