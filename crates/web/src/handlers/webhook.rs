use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sig_check_core::{AppError, config::Config};
use sig_check_github::{
    AppAuth, CheckRuns,
    events::{self, Dispatch},
    webhook::GitHubEvent,
};

/// `POST /event_handler`. Routes the verified event through the dispatch
/// table and issues the corresponding check-run calls. Events outside the
/// table are acknowledged with 200 so GitHub does not redeliver them;
/// remote-API failures propagate as 500 and GitHub redelivers the webhook.
pub async fn webhook(
    State(config): State<Arc<Config>>,
    State(auth): State<Arc<AppAuth>>,
    GitHubEvent { event }: GitHubEvent,
) -> Result<Response, AppError> {
    match events::dispatch(&event, config.github.app_id) {
        Dispatch::CreateRun { installation, repo, head_sha } => {
            let client = auth.installation_client(installation).await?;
            CheckRuns::new(client, repo).create(&config.check.name, &head_sha).await?;
            Ok((StatusCode::OK, "Check run created").into_response())
        }
        Dispatch::InitiateRun { installation, repo, id } => {
            let client = auth.installation_client(installation).await?;
            CheckRuns::new(client, repo).initiate(id, &config.check).await?;
            Ok((StatusCode::OK, "Check run initiated").into_response())
        }
        Dispatch::CompleteSuccess { installation, repo, id } => {
            let client = auth.installation_client(installation).await?;
            CheckRuns::new(client, repo).complete_success(id).await?;
            Ok((StatusCode::OK, "Check run completed").into_response())
        }
        Dispatch::RequireSia { installation, repo, id } => {
            let client = auth.installation_client(installation).await?;
            CheckRuns::new(client, repo).require_sia(id, &config.check).await?;
            Ok((StatusCode::OK, "Check run completed").into_response())
        }
        Dispatch::Ignore => {
            tracing::debug!("Ignoring event {:?}", event);
            Ok((StatusCode::OK, "Event ignored").into_response())
        }
    }
}
