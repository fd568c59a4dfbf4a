//! Typed webhook payloads and the event-to-action dispatch table.
//!
//! Only the fields this app consumes are modeled; everything else in the
//! payload is ignored by serde. Unknown actions deserialize to an `Other`
//! arm so new GitHub actions never break parsing.

use serde::Deserialize;

/// Identifier attached to the "Yes" / "SIA required" follow-up action.
pub const ACTION_IS_SIG_CHANGE: &str = "is_sig_change";
/// Identifier attached to the "No" / "SIA Complete" follow-up action.
pub const ACTION_NOT_SIG_CHANGE: &str = "not_sig_change";

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    /// Full name of the repository, e.g. "octocat/hello-world".
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct App {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuite {
    pub head_sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub head_sha: String,
    /// The app that created this check run. Events for other apps' runs are
    /// delivered too and must be ignored.
    pub app: App,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestedAction {
    pub identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSuiteAction {
    Requested,
    Rerequested,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunAction {
    Created,
    Rerequested,
    RequestedAction,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuiteEvent {
    pub action: CheckSuiteAction,
    pub check_suite: CheckSuite,
    pub repository: Repository,
    pub installation: Option<Installation>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRunEvent {
    pub action: CheckRunAction,
    pub check_run: CheckRun,
    /// Present only when `action` is `requested_action`.
    pub requested_action: Option<RequestedAction>,
    pub repository: Repository,
    pub installation: Option<Installation>,
}

#[derive(Debug)]
pub enum WebhookEvent {
    CheckSuite(CheckSuiteEvent),
    CheckRun(CheckRunEvent),
    /// Any event type this app does not handle.
    Other,
}

impl WebhookEvent {
    /// Parse the JSON body for the event named by the `X-GitHub-Event` header.
    pub fn from_header_and_body(event: &str, body: &[u8]) -> serde_json::Result<Self> {
        match event {
            "check_suite" => serde_json::from_slice(body).map(Self::CheckSuite),
            "check_run" => serde_json::from_slice(body).map(Self::CheckRun),
            _ => Ok(Self::Other),
        }
    }
}

/// What the webhook handler should do for one inbound event.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Create a fresh (queued) check run at `head_sha`.
    CreateRun { installation: u64, repo: String, head_sha: String },
    /// Run our check: in_progress, then completed(failure) offering Yes/No.
    InitiateRun { installation: u64, repo: String, id: u64 },
    /// "No" or "SIA Complete" was selected: completed(success).
    CompleteSuccess { installation: u64, repo: String, id: u64 },
    /// "Yes" was selected: completed(failure) pointing at the SIA form.
    RequireSia { installation: u64, repo: String, id: u64 },
    Ignore,
}

/// Pure routing table over `{event_type, action}`. Events for check runs
/// owned by other apps, events without an installation, and anything not in
/// the table dispatch to [`Dispatch::Ignore`].
pub fn dispatch(event: &WebhookEvent, app_id: u64) -> Dispatch {
    match event {
        WebhookEvent::CheckSuite(event) => {
            let Some(installation) = event.installation else {
                return Dispatch::Ignore;
            };
            match event.action {
                CheckSuiteAction::Requested | CheckSuiteAction::Rerequested => {
                    Dispatch::CreateRun {
                        installation: installation.id,
                        repo: event.repository.full_name.clone(),
                        head_sha: event.check_suite.head_sha.clone(),
                    }
                }
                CheckSuiteAction::Other => Dispatch::Ignore,
            }
        }
        WebhookEvent::CheckRun(event) => {
            let Some(installation) = event.installation else {
                return Dispatch::Ignore;
            };
            if event.check_run.app.id != app_id {
                return Dispatch::Ignore;
            }
            let installation = installation.id;
            let repo = event.repository.full_name.clone();
            match event.action {
                CheckRunAction::Created => {
                    Dispatch::InitiateRun { installation, repo, id: event.check_run.id }
                }
                CheckRunAction::Rerequested => Dispatch::CreateRun {
                    installation,
                    repo,
                    head_sha: event.check_run.head_sha.clone(),
                },
                CheckRunAction::RequestedAction => {
                    match event.requested_action.as_ref().map(|a| a.identifier.as_str()) {
                        Some(ACTION_NOT_SIG_CHANGE) => {
                            Dispatch::CompleteSuccess { installation, repo, id: event.check_run.id }
                        }
                        Some(ACTION_IS_SIG_CHANGE) => {
                            Dispatch::RequireSia { installation, repo, id: event.check_run.id }
                        }
                        _ => Dispatch::Ignore,
                    }
                }
                CheckRunAction::Other => Dispatch::Ignore,
            }
        }
        WebhookEvent::Other => Dispatch::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const APP_ID: u64 = 12345;

    fn check_suite_body(action: &str) -> Vec<u8> {
        json!({
            "action": action,
            "check_suite": { "head_sha": "abc123" },
            "repository": { "full_name": "org/repo" },
            "installation": { "id": 42 },
        })
        .to_string()
        .into_bytes()
    }

    fn check_run_body(action: &str, app_id: u64, requested: Option<&str>) -> Vec<u8> {
        let mut body = json!({
            "action": action,
            "check_run": {
                "id": 7,
                "head_sha": "abc123",
                "app": { "id": app_id },
            },
            "repository": { "full_name": "org/repo" },
            "installation": { "id": 42 },
        });
        if let Some(identifier) = requested {
            body["requested_action"] = json!({ "identifier": identifier });
        }
        body.to_string().into_bytes()
    }

    fn dispatch_for(event: &str, body: &[u8]) -> Dispatch {
        let event = WebhookEvent::from_header_and_body(event, body).unwrap();
        dispatch(&event, APP_ID)
    }

    #[test]
    fn check_suite_requested_creates_run() {
        for action in ["requested", "rerequested"] {
            assert_eq!(
                dispatch_for("check_suite", &check_suite_body(action)),
                Dispatch::CreateRun {
                    installation: 42,
                    repo: "org/repo".into(),
                    head_sha: "abc123".into(),
                },
            );
        }
    }

    #[test]
    fn check_suite_completed_is_ignored() {
        assert_eq!(dispatch_for("check_suite", &check_suite_body("completed")), Dispatch::Ignore);
    }

    #[test]
    fn check_run_created_initiates_run() {
        assert_eq!(
            dispatch_for("check_run", &check_run_body("created", APP_ID, None)),
            Dispatch::InitiateRun { installation: 42, repo: "org/repo".into(), id: 7 },
        );
    }

    #[test]
    fn check_run_rerequested_creates_run_at_run_head() {
        assert_eq!(
            dispatch_for("check_run", &check_run_body("rerequested", APP_ID, None)),
            Dispatch::CreateRun {
                installation: 42,
                repo: "org/repo".into(),
                head_sha: "abc123".into(),
            },
        );
    }

    #[test]
    fn requested_action_routes_on_identifier() {
        assert_eq!(
            dispatch_for(
                "check_run",
                &check_run_body("requested_action", APP_ID, Some(ACTION_NOT_SIG_CHANGE)),
            ),
            Dispatch::CompleteSuccess { installation: 42, repo: "org/repo".into(), id: 7 },
        );
        assert_eq!(
            dispatch_for(
                "check_run",
                &check_run_body("requested_action", APP_ID, Some(ACTION_IS_SIG_CHANGE)),
            ),
            Dispatch::RequireSia { installation: 42, repo: "org/repo".into(), id: 7 },
        );
        assert_eq!(
            dispatch_for("check_run", &check_run_body("requested_action", APP_ID, Some("bogus"))),
            Dispatch::Ignore,
        );
    }

    #[test]
    fn check_run_for_another_app_is_ignored() {
        assert_eq!(
            dispatch_for("check_run", &check_run_body("created", APP_ID + 1, None)),
            Dispatch::Ignore,
        );
    }

    #[test]
    fn unknown_event_types_and_actions_are_ignored() {
        assert_eq!(dispatch_for("pull_request", b"{}"), Dispatch::Ignore);
        // An action string added by GitHub later must still deserialize
        assert_eq!(
            dispatch_for("check_run", &check_run_body("completed", APP_ID, None)),
            Dispatch::Ignore,
        );
    }

    #[test]
    fn missing_installation_is_ignored() {
        let body = json!({
            "action": "requested",
            "check_suite": { "head_sha": "abc123" },
            "repository": { "full_name": "org/repo" },
        })
        .to_string()
        .into_bytes();
        assert_eq!(dispatch_for("check_suite", &body), Dispatch::Ignore);
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        assert!(WebhookEvent::from_header_and_body("check_suite", b"{not json").is_err());
        assert!(WebhookEvent::from_header_and_body("check_suite", b"{}").is_err());
    }
}
