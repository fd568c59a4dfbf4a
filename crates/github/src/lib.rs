pub mod events;
pub mod webhook;

use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use sig_check_core::config::{CheckConfig, GitHubConfig};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::events::{ACTION_IS_SIG_CHANGE, ACTION_NOT_SIG_CHANGE};

/// GitHub rejects assertions valid for more than 10 minutes; stay under it.
const JWT_LIFETIME: Duration = Duration::minutes(9);
/// Backdate issued-at to tolerate clock drift between us and GitHub.
const JWT_BACKDATE: Duration = Duration::seconds(60);
/// Re-sign when the cached assertion is this close to expiry.
const JWT_REFRESH_MARGIN: Duration = Duration::seconds(30);

#[derive(Debug, Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: u64,
}

impl Claims {
    fn new(app_id: u64, now: OffsetDateTime) -> Self {
        Self {
            iat: (now - JWT_BACKDATE).unix_timestamp(),
            exp: (now + JWT_LIFETIME).unix_timestamp(),
            iss: app_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokens {
    token: String,
}

struct CachedJwt {
    token: String,
    expires_at: OffsetDateTime,
}

/// GitHub App authentication: a cached signed assertion plus per-request
/// installation token exchange.
pub struct AppAuth {
    app_id: u64,
    encoding_key: EncodingKey,
    api_base: Option<String>,
    timeout: StdDuration,
    cached: Mutex<Option<CachedJwt>>,
}

impl AppAuth {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .context("Failed to parse GitHub App private key")?;
        Ok(Self {
            app_id: config.app_id,
            encoding_key,
            api_base: config.api_base.clone(),
            timeout: StdDuration::from_secs(config.request_timeout_secs),
            cached: Mutex::new(None),
        })
    }

    /// The app's signed assertion, re-signed when the cached one is within
    /// [`JWT_REFRESH_MARGIN`] of its expiry.
    pub async fn jwt(&self) -> Result<String> { self.jwt_at(OffsetDateTime::now_utc()).await }

    async fn jwt_at(&self, now: OffsetDateTime) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(jwt) = &*cached {
            if jwt.expires_at - now > JWT_REFRESH_MARGIN {
                return Ok(jwt.token.clone());
            }
        }
        let claims = Claims::new(self.app_id, now);
        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .context("Failed to sign app JWT")?;
        tracing::debug!("Signed new app JWT (exp {})", claims.exp);
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)?;
        *cached = Some(CachedJwt { token: token.clone(), expires_at });
        Ok(token)
    }

    /// Exchange the app JWT for an installation token and build a client
    /// authorized for that installation.
    pub async fn installation_client(&self, installation_id: u64) -> Result<Octocrab> {
        let jwt = self.jwt().await?;
        let app_client = self.client_with_token(jwt)?;
        let tokens: AccessTokens = app_client
            .post(format!("/app/installations/{installation_id}/access_tokens"), None::<&()>)
            .await
            .with_context(|| {
                format!("Failed to create access token for installation {installation_id}")
            })?;
        self.client_with_token(tokens.token)
    }

    fn client_with_token(&self, token: String) -> Result<Octocrab> {
        let mut builder = Octocrab::builder()
            .personal_token(token)
            .set_connect_timeout(Some(self.timeout))
            .set_read_timeout(Some(self.timeout))
            .set_write_timeout(Some(self.timeout));
        if let Some(api_base) = &self.api_base {
            builder = builder.base_uri(api_base.as_str()).context("Invalid API base URI")?;
        }
        builder.build().context("Failed to create GitHub client")
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckRunStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckRunConclusion {
    Success,
    Failure,
}

#[derive(Debug, Serialize)]
struct CheckRunOutput {
    title: String,
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckRunApiAction {
    label: &'static str,
    description: &'static str,
    identifier: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateCheckRun<'a> {
    name: &'a str,
    head_sha: &'a str,
}

#[derive(Debug, Default, Serialize)]
struct UpdateCheckRun {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<CheckRunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<CheckRunConclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<CheckRunOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actions: Option<Vec<CheckRunApiAction>>,
}

#[derive(Debug, Deserialize)]
struct CheckRunId {
    id: u64,
}

const ACTION_YES: CheckRunApiAction = CheckRunApiAction {
    label: "Yes",
    description: "This is a significant change",
    identifier: ACTION_IS_SIG_CHANGE,
};
const ACTION_NO: CheckRunApiAction = CheckRunApiAction {
    label: "No",
    description: "This is not a significant change",
    identifier: ACTION_NOT_SIG_CHANGE,
};
const ACTION_SIA_COMPLETE: CheckRunApiAction = CheckRunApiAction {
    label: "SIA Complete",
    description: "The Security Impact Analysis is done",
    identifier: ACTION_NOT_SIG_CHANGE,
};

fn review_checklist(check: &CheckConfig) -> Option<String> {
    if check.questions.is_empty() {
        return None;
    }
    let mut text = String::new();
    for question in &check.questions {
        text.push_str("- [ ] ");
        text.push_str(question);
        text.push('\n');
    }
    Some(text)
}

/// Check-run calls against one repository, using an installation-authorized
/// client. The checks endpoints have no typed octocrab surface covering
/// output and requested actions, so the request bodies are sent raw.
pub struct CheckRuns {
    client: Octocrab,
    repo: String,
}

impl CheckRuns {
    pub fn new(client: Octocrab, repo: impl Into<String>) -> Self {
        Self { client, repo: repo.into() }
    }

    /// Create a new check run at `head_sha`, leaving it queued.
    pub async fn create(&self, name: &str, head_sha: &str) -> Result<()> {
        let created: CheckRunId = self
            .client
            .post(
                format!("/repos/{}/check-runs", self.repo),
                Some(&CreateCheckRun { name, head_sha }),
            )
            .await
            .with_context(|| format!("Failed to create check run for {}@{head_sha}", self.repo))?;
        tracing::info!("Created check run {} for {}@{}", created.id, self.repo, head_sha);
        Ok(())
    }

    async fn update(&self, id: u64, update: &UpdateCheckRun) -> Result<()> {
        let _: CheckRunId = self
            .client
            .patch(format!("/repos/{}/check-runs/{id}", self.repo), Some(update))
            .await
            .with_context(|| format!("Failed to update check run {id} in {}", self.repo))?;
        Ok(())
    }

    /// Transition the run to in_progress, then complete it as a failure
    /// offering the Yes/No significance decision.
    pub async fn initiate(&self, id: u64, check: &CheckConfig) -> Result<()> {
        self.update(id, &UpdateCheckRun {
            status: Some(CheckRunStatus::InProgress),
            ..Default::default()
        })
        .await?;
        self.update(id, &UpdateCheckRun {
            status: Some(CheckRunStatus::Completed),
            conclusion: Some(CheckRunConclusion::Failure),
            output: Some(CheckRunOutput {
                title: check.name.clone(),
                summary: check.summary.clone(),
                text: review_checklist(check),
            }),
            actions: Some(vec![ACTION_YES, ACTION_NO]),
        })
        .await?;
        tracing::info!("Initiated check run {} in {}", id, self.repo);
        Ok(())
    }

    /// Complete the run as a success with no further actions.
    pub async fn complete_success(&self, id: u64) -> Result<()> {
        self.update(id, &UpdateCheckRun {
            status: Some(CheckRunStatus::Completed),
            conclusion: Some(CheckRunConclusion::Success),
            ..Default::default()
        })
        .await?;
        tracing::info!("Completed check run {} in {} as success", id, self.repo);
        Ok(())
    }

    /// Complete the run as a failure pointing at the SIA form, offering a
    /// single resubmission action.
    pub async fn require_sia(&self, id: u64, check: &CheckConfig) -> Result<()> {
        self.update(id, &UpdateCheckRun {
            status: Some(CheckRunStatus::Completed),
            conclusion: Some(CheckRunConclusion::Failure),
            output: Some(CheckRunOutput {
                title: check.name.clone(),
                summary: format!(
                    "A Security Impact Analysis is required for this change. Complete the SIA \
                     form at {} and select \"SIA Complete\" once it has been reviewed.",
                    check.sia_form_url
                ),
                text: None,
            }),
            actions: Some(vec![ACTION_SIA_COMPLETE]),
        })
        .await?;
        tracing::info!("Check run {} in {} requires an SIA", id, self.repo);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = include_str!("../testdata/key.pem");

    fn test_auth() -> AppAuth {
        AppAuth::new(&GitHubConfig {
            app_id: 12345,
            webhook_secret: "secret".into(),
            private_key: TEST_KEY.into(),
            api_base: None,
            request_timeout_secs: 10,
        })
        .unwrap()
    }

    #[test]
    fn claims_window() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let claims = Claims::new(12345, now);
        assert_eq!(claims.iss, 12345);
        assert_eq!(claims.iat, 1_700_000_000 - 60);
        assert_eq!(claims.exp, 1_700_000_000 + 9 * 60);
        // The whole window stays under GitHub's 10 minute limit
        assert!(claims.exp - now.unix_timestamp() <= 10 * 60);
    }

    #[tokio::test]
    async fn jwt_is_cached_until_near_expiry() {
        let auth = test_auth();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let first = auth.jwt_at(now).await.unwrap();
        // Well before the margin: same assertion
        let second = auth.jwt_at(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(first, second);
        // Within the refresh margin: re-signed with fresh claims
        let third = auth.jwt_at(now + JWT_LIFETIME - Duration::seconds(10)).await.unwrap();
        assert_ne!(first, third);
        // And the fresh one is cached in turn
        let fourth = auth.jwt_at(now + JWT_LIFETIME).await.unwrap();
        assert_eq!(third, fourth);
    }

    #[test]
    fn rejects_garbage_private_key() {
        let result = AppAuth::new(&GitHubConfig {
            app_id: 1,
            webhook_secret: "secret".into(),
            private_key: "not a pem".into(),
            api_base: None,
            request_timeout_secs: 10,
        });
        assert!(result.is_err());
    }

    #[test]
    fn initiate_update_body_offers_yes_and_no() {
        let body = UpdateCheckRun {
            status: Some(CheckRunStatus::Completed),
            conclusion: Some(CheckRunConclusion::Failure),
            output: Some(CheckRunOutput {
                title: "Significant Change".into(),
                summary: "summary".into(),
                text: review_checklist(&CheckConfig::default()),
            }),
            actions: Some(vec![ACTION_YES, ACTION_NO]),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["conclusion"], "failure");
        assert_eq!(value["actions"][0]["identifier"], "is_sig_change");
        assert_eq!(value["actions"][1]["identifier"], "not_sig_change");
        assert!(value["output"]["text"].as_str().unwrap().starts_with("- [ ] "));
    }

    #[test]
    fn success_update_body_has_no_actions() {
        let body = UpdateCheckRun {
            status: Some(CheckRunStatus::Completed),
            conclusion: Some(CheckRunConclusion::Success),
            ..Default::default()
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["conclusion"], "success");
        assert!(value.get("actions").is_none());
        assert!(value.get("output").is_none());
    }

    #[test]
    fn empty_question_list_omits_checklist() {
        let check = CheckConfig { questions: vec![], ..CheckConfig::default() };
        assert_eq!(review_checklist(&check), None);
    }
}
