//! Document upload: async (task-backed) and blocking variants.

use std::io::Write;
use std::path::PathBuf;

use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Uploaded bytes are flushed to disk in segments of this size.
const WRITE_SEGMENT: usize = 8 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 3] = ["pdf", "md", "markdown"];

#[derive(Serialize)]
pub struct AsyncUploadResponse {
    pub task_id: String,
    pub filename: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub status: String,
    pub chunks_created: usize,
}

/// Reject anything that is not a PDF or Markdown file.
pub(crate) fn validate_extension(filename: &str) -> Result<(), ApiError> {
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        other => Err(ApiError::bad_request(format!(
            "only PDF and Markdown files are supported, got: {}",
            other.map(|e| format!(".{e}")).unwrap_or_else(|| "no extension".to_string())
        ))),
    }
}

/// Stream the multipart `file` field to a temp path in 8 MiB segments.
async fn save_to_temp(multipart: &mut Multipart) -> ApiResult<(String, PathBuf)> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("multipart field has no filename"))?;
        validate_extension(&filename)?;

        let temp_path =
            std::env::temp_dir().join(format!("siliqa_{}_{filename}", Uuid::new_v4().simple()));
        let mut file = std::fs::File::create(&temp_path)
            .map_err(|e| ApiError(siliqa_common::SiliqaError::Io(e)))?;

        let mut segment: Vec<u8> = Vec::with_capacity(WRITE_SEGMENT);
        while let Some(bytes) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(format!("upload interrupted: {e}")))?
        {
            segment.extend_from_slice(&bytes);
            if segment.len() >= WRITE_SEGMENT {
                file.write_all(&segment)
                    .map_err(|e| ApiError(siliqa_common::SiliqaError::Io(e)))?;
                segment.clear();
            }
        }
        if !segment.is_empty() {
            file.write_all(&segment)
                .map_err(|e| ApiError(siliqa_common::SiliqaError::Io(e)))?;
        }

        return Ok((filename, temp_path));
    }
    Err(ApiError::bad_request("missing multipart field 'file'"))
}

/// Async ingest: saves the file and returns a task id immediately.
pub async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<Json<AsyncUploadResponse>> {
    let (filename, temp_path) = save_to_temp(&mut multipart).await?;
    let task_id = state
        .tasks
        .submit(state.engine.clone(), filename.clone(), temp_path);

    Ok(Json(AsyncUploadResponse { task_id, filename, status: "pending".to_string() }))
}

/// Blocking ingest: waits for processing; for small files and debugging.
pub async fn upload_sync(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let (filename, temp_path) = save_to_temp(&mut multipart).await?;

    let outcome = state.engine.ingest_document(&temp_path, &filename).await;
    let _ = std::fs::remove_file(&temp_path);
    let chunks_created = outcome?;

    Ok(Json(UploadResponse {
        filename,
        status: "success".to_string(),
        chunks_created,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_extensions() {
        assert!(validate_extension("guide.pdf").is_ok());
        assert!(validate_extension("notes.md").is_ok());
        assert!(validate_extension("notes.MARKDOWN").is_ok());
    }

    #[test]
    fn rejected_extensions() {
        assert!(validate_extension("archive.zip").is_err());
        assert!(validate_extension("script.tcl").is_err());
        assert!(validate_extension("no_extension").is_err());
    }
}
