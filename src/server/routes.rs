use axum::{
    body::Body,
    extract::{rejection::FormRejection, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::coordinator::{Intake, Readiness};
use crate::server::error::AppError;
use crate::server::AppContext;

const BAD_REQUEST: &str = "Bad request";

pub(crate) async fn health() -> impl IntoResponse {
    StatusCode::OK
}

pub(crate) async fn progress(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.coordinator.progress())
}

#[derive(Deserialize)]
pub(crate) struct PlanForm {
    num: u32,
}

pub(crate) async fn plan(
    State(ctx): State<AppContext>,
    form: Result<Form<PlanForm>, FormRejection>,
) -> Result<Response, AppError> {
    let Ok(Form(form)) = form else {
        return Ok((StatusCode::BAD_REQUEST, BAD_REQUEST).into_response());
    };
    ctx.coordinator.set_total(form.num)?;
    Ok((StatusCode::OK, "Received").into_response())
}

/// `multipart/form-data` with an `index` field and a `file` field, in any
/// order. The file is streamed to a staging path before the index is
/// trusted.
pub(crate) async fn upload(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let staging = ctx.coordinator.staging_path();
    let mut index: Option<u32> = None;
    let mut received_file = false;

    let outcome: Result<(), Response> = async {
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Malformed multipart body: {}", e);
                    return Err((StatusCode::BAD_REQUEST, BAD_REQUEST).into_response());
                }
            };

            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("index") => {
                    let text = field
                        .text()
                        .await
                        .map_err(|_| (StatusCode::BAD_REQUEST, BAD_REQUEST).into_response())?;
                    index = Some(
                        text.trim()
                            .parse()
                            .map_err(|_| (StatusCode::BAD_REQUEST, BAD_REQUEST).into_response())?,
                    );
                }
                Some("file") => {
                    stream_field(field, &staging).await?;
                    received_file = true;
                }
                _ => {}
            }
        }
        Ok(())
    }
    .await;

    if let Err(response) = outcome {
        discard(&staging).await;
        return Ok(response);
    }

    let (Some(index), true) = (index, received_file) else {
        discard(&staging).await;
        return Ok((StatusCode::BAD_REQUEST, BAD_REQUEST).into_response());
    };

    if let Err(e) = ctx
        .coordinator
        .accept_clip(index, &staging, Intake::Move)
        .await
    {
        discard(&staging).await;
        return Err(e.into());
    }

    Ok((
        StatusCode::OK,
        format!("File {index} uploaded successfully"),
    )
        .into_response())
}

async fn stream_field(
    mut field: axum::extract::multipart::Field<'_>,
    dest: &std::path::Path,
) -> Result<(), Response> {
    let internal = |e: std::io::Error| AppError::from(e).into_response();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(internal)?;
    }
    let mut file = tokio::fs::File::create(dest).await.map_err(internal)?;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => file.write_all(&chunk).await.map_err(internal)?,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Upload interrupted: {}", e);
                return Err((StatusCode::BAD_REQUEST, BAD_REQUEST).into_response());
            }
        }
    }
    file.flush().await.map_err(internal)?;
    Ok(())
}

async fn discard(path: &std::path::Path) {
    if let Err(e) = dayreel_av::artifact::remove_if_exists(path).await {
        tracing::warn!("Failed to remove staged upload {}: {}", path.display(), e);
    }
}

pub(crate) async fn status(State(ctx): State<AppContext>) -> Result<Response, AppError> {
    let response = match ctx.coordinator.readiness().await? {
        Readiness::ProcessingClips { .. } => {
            (StatusCode::ACCEPTED, "Processing individual videos...").into_response()
        }
        Readiness::MergeStarted => (
            StatusCode::ACCEPTED,
            "Processing started, try again in 1 minute",
        )
            .into_response(),
        Readiness::Merging => {
            (StatusCode::ACCEPTED, "Processing, try again in 1 minute").into_response()
        }
        Readiness::Stalled(stall) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Processing stalled: {stall}"),
        )
            .into_response(),
        Readiness::Ready(path) => {
            let file = tokio::fs::File::open(&path).await?;
            let len = file.metadata().await?.len();
            let body = Body::from_stream(ReaderStream::new(file));
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "video/mp4")
                .header(header::CONTENT_LENGTH, len)
                .body(body)
                .map_err(|e| dayreel_common::Error::Internal(e.to_string()))?
        }
    };
    Ok(response)
}

pub(crate) async fn done(State(ctx): State<AppContext>) -> Result<Response, AppError> {
    let completion = ctx.coordinator.finish().await?;
    if let Some(path) = &completion.saved_to {
        tracing::info!("Run complete, result at {}", path.display());
    } else {
        tracing::info!("Run complete");
    }
    ctx.shutdown.cancel();
    Ok((StatusCode::OK, "Done").into_response())
}
