//! Request/response boundary for UI and CLI callers. Nothing here returns
//! `Err`; failures travel inside [`ApiResponse::Error`].

use crate::duplicates::{Resolution, ResolutionOutcome};
use crate::error::{ErrorKind, IngestError, Result};
use crate::finalize::{FinalizeOptions, FinalizeResult};
use crate::pipeline::{BatchSummary, IngestEvent, IngestionPipeline};
use crate::router::UploadedFile;
use crate::schema::StagedAssetPatch;
use crate::staging::SessionView;
use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiResponse<T> {
    Success { data: T },
    Error { error: ApiError },
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ApiResponse::Success { data } => Some(data),
            ApiResponse::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            ApiResponse::Success { .. } => None,
            ApiResponse::Error { error } => Some(error),
        }
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => ApiResponse::Success { data },
            Err(e) => {
                if e.kind() == ErrorKind::Internal {
                    error!("Internal error at pipeline boundary: {}", e);
                }
                ApiResponse::Error { error: ApiError::from(&e) }
            }
        }
    }
}

impl From<&IngestError> for ApiError {
    fn from(error: &IngestError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub user_id: String,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStagedRequest {
    pub session_id: Uuid,
    pub patches: Vec<StagedAssetPatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStagedResponse {
    pub updated_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveDuplicatesRequest {
    pub session_id: Uuid,
    /// Any member of the group being resolved.
    pub member_id: String,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub session_id: Uuid,
    #[serde(default)]
    pub options: FinalizeOptions,
}

#[derive(Clone)]
pub struct PipelineApi {
    pipeline: Arc<IngestionPipeline>,
}

impl PipelineApi {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn ingest(&self, request: IngestRequest, progress: Option<Sender<IngestEvent>>) -> ApiResponse<BatchSummary> {
        self.pipeline
            .ingest(&request.user_id, &request.files, progress)
            .await
            .into()
    }

    pub async fn review(&self, session_id: Uuid) -> ApiResponse<SessionView> {
        self.pipeline.review(session_id).await.into()
    }

    pub async fn update_staged(&self, request: UpdateStagedRequest) -> ApiResponse<UpdateStagedResponse> {
        self.pipeline
            .update_staged(request.session_id, &request.patches)
            .await
            .map(|updated_count| UpdateStagedResponse { updated_count })
            .into()
    }

    pub async fn resolve_duplicates(&self, request: ResolveDuplicatesRequest) -> ApiResponse<ResolutionOutcome> {
        self.pipeline
            .resolve_duplicates(request.session_id, &request.member_id, &request.resolution)
            .await
            .into()
    }

    pub async fn finalize(&self, request: FinalizeRequest) -> ApiResponse<FinalizeResult> {
        self.pipeline
            .finalize(request.session_id, &request.options)
            .await
            .into()
    }

    pub async fn cancel(&self, session_id: Uuid) -> ApiResponse<()> {
        self.pipeline.cancel(session_id).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FinalizeError;
    use serde_json::json;

    #[test]
    fn test_response_shapes() {
        let ok: ApiResponse<UpdateStagedResponse> = Ok(UpdateStagedResponse { updated_count: 3 }).into();
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "status": "success", "data": { "updated_count": 3 } })
        );

        let err: ApiResponse<FinalizeResult> = Err(IngestError::from(FinalizeError::NoAssetsSelected)).into();
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["kind"], "no_assets_selected");
        assert!(value["error"]["message"].as_str().unwrap().contains("No assets selected"));
    }

    #[test]
    fn test_finalize_request_defaults_options() {
        let request: FinalizeRequest = serde_json::from_value(json!({
            "session_id": "67e55044-10b1-426f-9247-bb680e5fe0c8"
        }))
        .unwrap();
        assert_eq!(request.options, FinalizeOptions::default());

        let resolve: ResolveDuplicatesRequest = serde_json::from_value(json!({
            "session_id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "member_id": "abc",
            "resolution": { "action": "delete_one", "ids": ["67e55044-10b1-426f-9247-bb680e5fe0c8"] }
        }))
        .unwrap();
        assert!(matches!(resolve.resolution, Resolution::DeleteOne { ref ids } if ids.len() == 1));
    }
}
