use std::sync::Arc;

use bytes::Bytes;
use poem::http::StatusCode;
use poem::web::headers::{ContentLength, HeaderMapExt};
use poem::{Endpoint, EndpointExt, IntoEndpoint};
use poem_openapi::param::Path;
use poem_openapi::payload::{Binary, Json};
use poem_openapi::types::multipart::Upload;
use poem_openapi::types::Any;
use poem_openapi::{ApiResponse, Multipart, Object, OpenApi};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::controller::{ImageLifecycleManager, MetadataInput};
use crate::error::LifecycleError;
use crate::models::FileUpload;
use crate::response::{
    describe_error,
    framework_error,
    BulkDeletionBody,
    DeletionBody,
    ErrorBody,
    FailureKind,
    HealthBody,
    ImageBody,
    ImageListBody,
    ReconciliationBody,
};
use crate::validation::{self, ValidationError};

/// Room for the form fields and part headers sent along with the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Wraps the API so bodies declaring more than an upload can hold are
/// refused before being read, and every error raised outside a handler
/// is answered with an `ErrorBody`.
pub fn guarded<E>(api: E, max_upload_size: usize) -> impl Endpoint
where
    E: IntoEndpoint,
    E::Endpoint: 'static,
{
    let max_body_size = (max_upload_size + MULTIPART_OVERHEAD) as u64;

    api.around(move |ep, req| async move {
        let declared = req.headers().typed_get::<ContentLength>().map(|len| len.0);
        if declared.map(|len| len > max_body_size).unwrap_or(false) {
            return Err(poem::Error::from_string(
                ValidationError::FileTooLarge(max_upload_size).to_string(),
                StatusCode::BAD_REQUEST,
            ));
        }

        ep.call(req).await
    })
    .catch_all_error(framework_error)
}

/// Generates a response type with the shared failure variants.
macro_rules! api_response {
    ( $name:ident, $body:ty ) => {
        #[derive(ApiResponse)]
        pub enum $name {
            #[oai(status = 200)]
            Ok(Json<$body>),

            #[oai(status = 400)]
            BadRequest(Json<ErrorBody>),

            #[oai(status = 404)]
            NotFound(Json<ErrorBody>),

            #[oai(status = 502)]
            BadGateway(Json<ErrorBody>),

            #[oai(status = 500)]
            InternalServerError(Json<ErrorBody>),
        }

        impl $name {
            fn failed(e: LifecycleError, context: &str, expose_internal: bool) -> Self {
                let (kind, body) = describe_error(e, context, expose_internal);
                match kind {
                    FailureKind::BadRequest => Self::BadRequest(Json(body)),
                    FailureKind::NotFound => Self::NotFound(Json(body)),
                    FailureKind::BadGateway => Self::BadGateway(Json(body)),
                    FailureKind::Internal => Self::InternalServerError(Json(body)),
                }
            }
        }
    };
}

api_response!(ImageResponse, ImageBody);
api_response!(ImageListResponse, ImageListBody);
api_response!(DeletionResponse, DeletionBody);
api_response!(BulkDeletionResponse, BulkDeletionBody);
api_response!(ReconciliationResponse, ReconciliationBody);

#[derive(ApiResponse)]
pub enum UploadResponse {
    #[oai(status = 201)]
    Created(Json<ImageBody>),

    #[oai(status = 400)]
    BadRequest(Json<ErrorBody>),

    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),

    #[oai(status = 502)]
    BadGateway(Json<ErrorBody>),

    #[oai(status = 500)]
    InternalServerError(Json<ErrorBody>),
}

#[derive(ApiResponse)]
pub enum ImageFileResponse {
    #[oai(status = 200)]
    Ok(Binary<Vec<u8>>, #[oai(header = "content-type")] String),

    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),

    #[oai(status = 502)]
    BadGateway(Json<ErrorBody>),

    #[oai(status = 500)]
    InternalServerError(Json<ErrorBody>),
}

#[derive(ApiResponse)]
pub enum HealthResponse {
    #[oai(status = 200)]
    Ok(Json<HealthBody>),
}

#[derive(Debug, Multipart)]
pub struct UploadImagePayload {
    /// The image file, exactly one per request.
    image: Vec<Upload>,

    /// A JSON encoded array of tags.
    tags: Option<String>,

    /// The person pictured.
    person: Option<String>,
}

#[derive(Debug, Object)]
pub struct CommentPayload {
    /// A reference to the commenting user.
    author: String,
    text: String,
}

#[derive(Debug, Object)]
pub struct MetadataPayload {
    /// Either an array of tags or the JSON text of one.
    tags: Option<Any<Value>>,

    /// The person pictured, an empty string clears it.
    person: Option<Any<Value>>,
}

pub struct AlbumImagesApi {
    manager: Arc<ImageLifecycleManager>,
    expose_internal_errors: bool,
}

impl AlbumImagesApi {
    pub fn new(manager: Arc<ImageLifecycleManager>, expose_internal_errors: bool) -> Self {
        Self {
            manager,
            expose_internal_errors,
        }
    }
}

impl AlbumImagesApi {
    /// Reads the uploaded part, stopping as soon as it exceeds the
    /// upload limit.
    async fn read_upload(&self, upload: Upload) -> Result<FileUpload, UploadResponse> {
        let max_size = self.manager.max_upload_size();
        let filename = upload.file_name().unwrap_or("image").to_string();
        let content_type = upload
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut data = Vec::new();
        let read = upload
            .into_async_read()
            .take(max_size as u64 + 1)
            .read_to_end(&mut data)
            .await;

        if let Err(e) = read {
            error!("Failed to read uploaded file: {}", e);
            return Err(UploadResponse::InternalServerError(Json(ErrorBody {
                success: false,
                message: "File upload error".to_string(),
                error: self.expose_internal_errors.then(|| e.to_string()),
            })));
        }

        if data.len() > max_size {
            return Err(self.upload_failed(ValidationError::FileTooLarge(max_size).into()));
        }

        Ok(FileUpload {
            filename,
            content_type,
            data: Bytes::from(data),
        })
    }

    fn upload_failed(&self, e: LifecycleError) -> UploadResponse {
        let (kind, body) = describe_error(e, "Upload", self.expose_internal_errors);
        match kind {
            FailureKind::BadRequest => UploadResponse::BadRequest(Json(body)),
            FailureKind::NotFound => UploadResponse::NotFound(Json(body)),
            FailureKind::BadGateway => UploadResponse::BadGateway(Json(body)),
            FailureKind::Internal => UploadResponse::InternalServerError(Json(body)),
        }
    }
}

#[OpenApi]
impl AlbumImagesApi {
    /// Upload an image
    ///
    /// Uploads a single image to the album with optional tags and person.
    #[oai(path = "/albums/:album_id/images", method = "post")]
    pub async fn upload_image(
        &self,
        album_id: Path<String>,
        payload: UploadImagePayload,
    ) -> UploadResponse {
        let file = match validation::single_file(payload.image) {
            Ok(None) => None,
            Ok(Some(upload)) => match self.read_upload(upload).await {
                Ok(file) => Some(file),
                Err(resp) => return resp,
            },
            Err(e) => return self.upload_failed(e.into()),
        };

        let metadata = MetadataInput {
            tags: payload.tags.map(Value::String).unwrap_or(Value::Null),
            person: payload.person.map(Value::String).unwrap_or(Value::Null),
        };

        match self.manager.upload(&album_id.0, file, metadata).await {
            Ok(image) => UploadResponse::Created(Json(ImageBody {
                success: true,
                message: "Image uploaded successfully".to_string(),
                image,
            })),
            Err(e) => self.upload_failed(e),
        }
    }

    /// List album images
    #[oai(path = "/albums/:album_id/images", method = "get")]
    pub async fn list_images(&self, album_id: Path<String>) -> ImageListResponse {
        match self.manager.list_images(&album_id.0).await {
            Ok(images) => ImageListResponse::Ok(Json(ImageListBody {
                success: true,
                message: "Images retrieved successfully".to_string(),
                count: images.len() as u64,
                images,
            })),
            Err(e) => ImageListResponse::failed(e, "Listing images", self.expose_internal_errors),
        }
    }

    /// List favorite album images
    #[oai(path = "/albums/:album_id/images/favorites", method = "get")]
    pub async fn list_favorites(&self, album_id: Path<String>) -> ImageListResponse {
        match self.manager.list_favorites(&album_id.0).await {
            Ok(images) => ImageListResponse::Ok(Json(ImageListBody {
                success: true,
                message: "Favorite images retrieved successfully".to_string(),
                count: images.len() as u64,
                images,
            })),
            Err(e) => ImageListResponse::failed(e, "Listing favorites", self.expose_internal_errors),
        }
    }

    /// Toggle the favorite flag of an image
    #[oai(path = "/albums/:album_id/images/:image_id/favorite", method = "put")]
    pub async fn toggle_favorite(&self, album_id: Path<String>, image_id: Path<Uuid>) -> ImageResponse {
        match self.manager.toggle_favorite(image_id.0, &album_id.0).await {
            Ok(image) => {
                let message = if image.is_favorite {
                    "Image added to favorites"
                } else {
                    "Image removed from favorites"
                };

                ImageResponse::Ok(Json(ImageBody {
                    success: true,
                    message: message.to_string(),
                    image,
                }))
            },
            Err(e) => ImageResponse::failed(e, "Toggling favorite", self.expose_internal_errors),
        }
    }

    /// Comment on an image
    #[oai(path = "/albums/:album_id/images/:image_id/comments", method = "post")]
    pub async fn add_comment(
        &self,
        album_id: Path<String>,
        image_id: Path<Uuid>,
        payload: Json<CommentPayload>,
    ) -> ImageResponse {
        let result = self
            .manager
            .add_comment(image_id.0, &album_id.0, &payload.0.author, &payload.0.text)
            .await;

        match result {
            Ok(image) => ImageResponse::Ok(Json(ImageBody {
                success: true,
                message: "Comment added successfully".to_string(),
                image,
            })),
            Err(e) => ImageResponse::failed(e, "Adding comment", self.expose_internal_errors),
        }
    }

    /// Update the tags and person of an image
    #[oai(path = "/albums/:album_id/images/:image_id/metadata", method = "put")]
    pub async fn update_metadata(
        &self,
        album_id: Path<String>,
        image_id: Path<Uuid>,
        payload: Json<MetadataPayload>,
    ) -> ImageResponse {
        let payload = payload.0;
        let metadata = MetadataInput {
            tags: payload.tags.map(|v| v.0).unwrap_or(Value::Null),
            person: payload.person.map(|v| v.0).unwrap_or(Value::Null),
        };

        match self.manager.update_metadata(image_id.0, &album_id.0, metadata).await {
            Ok(image) => ImageResponse::Ok(Json(ImageBody {
                success: true,
                message: "Image metadata updated successfully".to_string(),
                image,
            })),
            Err(e) => ImageResponse::failed(e, "Updating metadata", self.expose_internal_errors),
        }
    }

    /// Delete an image
    ///
    /// Succeeds once the record is removed, a failure to remove the stored
    /// object is reported in the result without failing the request.
    #[oai(path = "/albums/:album_id/images/:image_id", method = "delete")]
    pub async fn delete_image(&self, album_id: Path<String>, image_id: Path<Uuid>) -> DeletionResponse {
        match self.manager.delete_single(image_id.0, &album_id.0).await {
            Ok(result) => DeletionResponse::Ok(Json(DeletionBody {
                success: true,
                message: "Image deleted successfully".to_string(),
                result,
            })),
            Err(e) => DeletionResponse::failed(e, "Deleting image", self.expose_internal_errors),
        }
    }

    /// Delete every image in an album
    ///
    /// Called by the album service when an album is deleted.
    #[oai(path = "/albums/:album_id/images", method = "delete")]
    pub async fn delete_album_images(&self, album_id: Path<String>) -> BulkDeletionResponse {
        match self.manager.delete_all_for_album(&album_id.0).await {
            Ok(result) => BulkDeletionResponse::Ok(Json(BulkDeletionBody {
                success: true,
                message: format!("Deleted {} images", result.deleted_count),
                result,
            })),
            Err(e) => BulkDeletionResponse::failed(e, "Deleting album images", self.expose_internal_errors),
        }
    }

    /// Fetch the raw image data
    #[oai(path = "/albums/:album_id/images/:image_id/file", method = "get")]
    pub async fn serve_image(&self, album_id: Path<String>, image_id: Path<Uuid>) -> ImageFileResponse {
        match self.manager.fetch_image(image_id.0, &album_id.0).await {
            Ok((record, data)) => ImageFileResponse::Ok(Binary(data.to_vec()), record.content_type),
            Err(e) => {
                let (kind, body) = describe_error(e, "Serving image", self.expose_internal_errors);
                match kind {
                    FailureKind::NotFound | FailureKind::BadRequest => ImageFileResponse::NotFound(Json(body)),
                    FailureKind::BadGateway => ImageFileResponse::BadGateway(Json(body)),
                    FailureKind::Internal => ImageFileResponse::InternalServerError(Json(body)),
                }
            },
        }
    }

    /// Remove orphaned images
    ///
    /// Deletes every image whose album no longer exists.
    #[oai(path = "/admin/reconcile", method = "post")]
    pub async fn reconcile(&self) -> ReconciliationResponse {
        match self.manager.reconcile_orphans().await {
            Ok(result) => ReconciliationResponse::Ok(Json(ReconciliationBody {
                success: true,
                message: format!("Cleaned up {} orphaned images", result.cleaned_count),
                result,
            })),
            Err(e) => ReconciliationResponse::failed(e, "Reconciliation", self.expose_internal_errors),
        }
    }

    #[oai(path = "/health", method = "get")]
    pub async fn health(&self) -> HealthResponse {
        HealthResponse::Ok(Json(HealthBody {
            success: true,
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }
}
