use poem::web::Json;
use poem::{IntoResponse, Response};
use poem_openapi::Object;
use serde::Serialize;

use crate::error::LifecycleError;
use crate::models::{BulkDeletion, ImageRecord, Reconciliation, SingleDeletion};

/// The body returned for every failed request.
#[derive(Object, Serialize, Debug)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,

    /// Internal detail about the failure, omitted in production.
    pub error: Option<String>,
}

#[derive(Object, Debug)]
pub struct ImageBody {
    pub success: bool,
    pub message: String,
    pub image: ImageRecord,
}

#[derive(Object, Debug)]
pub struct ImageListBody {
    pub success: bool,
    pub message: String,
    pub count: u64,
    pub images: Vec<ImageRecord>,
}

#[derive(Object, Debug)]
pub struct DeletionBody {
    pub success: bool,
    pub message: String,
    pub result: SingleDeletion,
}

#[derive(Object, Debug)]
pub struct BulkDeletionBody {
    pub success: bool,
    pub message: String,
    pub result: BulkDeletion,
}

#[derive(Object, Debug)]
pub struct ReconciliationBody {
    pub success: bool,
    pub message: String,
    pub result: Reconciliation,
}

#[derive(Object, Debug)]
pub struct HealthBody {
    pub success: bool,
    pub status: String,
    pub version: String,
}

/// How a failure is reported to the client.
pub enum FailureKind {
    BadRequest,
    NotFound,
    BadGateway,
    Internal,
}

/// Converts a lifecycle error into its client facing form.
///
/// Client errors are reported as is, everything else is logged in full
/// and only described to the client when `expose_internal` is set.
pub fn describe_error(e: LifecycleError, context: &str, expose_internal: bool) -> (FailureKind, ErrorBody) {
    if e.is_client_error() {
        debug!("{} rejected: {}", context, &e);
        let kind = match e {
            LifecycleError::NotFound(_) => FailureKind::NotFound,
            _ => FailureKind::BadRequest,
        };

        return (
            kind,
            ErrorBody {
                success: false,
                message: e.to_string(),
                error: None,
            },
        );
    }

    error!("{} failed: {:?}", context, &e);
    let (kind, message) = match e {
        LifecycleError::ObjectStore(_) => (FailureKind::BadGateway, format!("{} failed, object store error", context)),
        _ => (FailureKind::Internal, "Internal server error".to_string()),
    };

    let error = if expose_internal { Some(e.detail()) } else { None };
    (
        kind,
        ErrorBody {
            success: false,
            message,
            error,
        },
    )
}

/// Answers errors raised before a handler runs, such as a malformed
/// path parameter or body, with the same envelope handlers use.
pub async fn framework_error(e: poem::Error) -> Response {
    let status = e.status();
    let message = if status.is_server_error() {
        error!("Request failed: {}", &e);
        "Internal server error".to_string()
    } else {
        debug!("Request rejected: {}", &e);
        e.to_string()
    };

    let body = ErrorBody {
        success: false,
        message,
        error: None,
    };

    Json(body).with_status(status).into_response()
}
