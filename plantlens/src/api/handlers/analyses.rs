//! HTTP handlers for plant analyses.
//!
//! `POST /analyses` is the one endpoint with real orchestration: validate the upload, check the
//! balance, call the analyzer, parse, then debit and store in a single transaction. The other
//! handlers read history back.

use axum::{
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Json},
};
use bytes::BytesMut;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::{
    AppState,
    analysis::{EncodedImage, parse},
    api::models::{
        analyses::{AnalysisDetail, AnalysisResponse, AnalysisSummary, AnalysisUpload, ListAnalysesQuery},
        pagination::PaginatedResponse,
        users::CurrentUser,
    },
    auth::permissions::{self, RequiresPermission, operation, resource},
    config::UploadConfig,
    db::{
        self,
        errors::DbError,
        handlers::{Analyses, Credits, analyses::AnalysisFilter},
        models::{analyses::AnalysisCreateDBRequest, credits::CreditTransactionCreateDBRequest},
    },
    errors::{Error, Result},
    types::{AnalysisId, Operation, Permission, Resource, abbrev_uuid},
};

/// Multipart field carrying the photo
const IMAGE_FIELD: &str = "image";

/// A validated upload
#[derive(Debug)]
struct ImageUpload {
    file_name: String,
    content_type: String,
    bytes: BytesMut,
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: "Request body is too large".to_string(),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {e}"),
        }
    }
}

fn too_large(max_bytes: usize) -> Error {
    Error::PayloadTooLarge {
        message: format!("Image exceeds the maximum allowed size of {max_bytes} bytes"),
    }
}

/// MIME essence of a declared content type, or `None` when the client sent nothing useful
fn declared_content_type(content_type: Option<&str>) -> Option<String> {
    let essence = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    match essence.as_str() {
        "" | "application/octet-stream" => None,
        _ => Some(essence),
    }
}

/// Pull the `image` field out of the form, enforcing the configured size and type rules.
async fn read_image_upload(multipart: &mut Multipart, config: &UploadConfig) -> Result<ImageUpload> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let declared = declared_content_type(field.content_type());

        let mut bytes = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > config.max_image_bytes {
                warn!(max_bytes = config.max_image_bytes, "Image upload exceeds size limit");
                return Err(too_large(config.max_image_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        if file_name.is_empty() || bytes.is_empty() {
            return Err(Error::BadRequest {
                message: "No image selected".to_string(),
            });
        }

        let content_type = declared
            .or_else(|| mime_guess::from_path(&file_name).first().map(|mime| mime.essence_str().to_string()))
            .ok_or_else(|| Error::BadRequest {
                message: "Could not determine the image type".to_string(),
            })?;

        if !config.allowed_content_types.iter().any(|allowed| allowed.eq_ignore_ascii_case(&content_type)) {
            return Err(Error::BadRequest {
                message: format!(
                    "Unsupported image type '{content_type}'. Allowed types: {}",
                    config.allowed_content_types.join(", ")
                ),
            });
        }

        return Ok(ImageUpload {
            file_name,
            content_type,
            bytes,
        });
    }

    Err(Error::BadRequest {
        message: "No image file provided".to_string(),
    })
}

fn record_outcome(outcome: &'static str) {
    counter!("plantlens_analyses_total", "outcome" => outcome).increment(1);
}

/// Analyze a plant photo
#[utoipa::path(
    post,
    path = "/analyses",
    tag = "analyses",
    summary = "Analyze a plant photo",
    description = "Upload a photo as the multipart field `image`. The photo is described by the vision model and the answer is split into a care card. One analysis costs `credits.cost_per_analysis` credits, which are only debited when the analysis succeeds.",
    request_body(content = AnalysisUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Analysis stored", body = AnalysisResponse),
        (status = 400, description = "No image, empty image or unsupported type"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Insufficient credits"),
        (status = 413, description = "Image too large"),
        (status = 502, description = "Image analysis failed"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&perm.user.id)))]
pub async fn create_analysis(
    State(state): State<AppState>,
    perm: RequiresPermission<resource::Analyses, operation::CreateOwn>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AnalysisResponse>)> {
    let user = perm.user;
    let cost = state.config.credits.cost_per_analysis;

    let upload = match read_image_upload(&mut multipart, &state.config.uploads).await {
        Ok(upload) => upload,
        Err(e) => {
            record_outcome("rejected");
            return Err(e);
        }
    };
    debug!(
        file_name = %upload.file_name,
        content_type = %upload.content_type,
        size = upload.bytes.len(),
        "Received plant image"
    );

    // Checked again when debiting; this one avoids paying for an upstream call we cannot bill
    {
        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        let balance = Credits::new(&mut conn).get_user_balance(user.id).await?;
        if balance < cost {
            record_outcome("insufficient_credits");
            return Err(Error::PaymentRequired { balance, required: cost });
        }
    }

    let image = EncodedImage::encode(upload.content_type, &upload.bytes);
    let raw_response = match state.analyzer.analyze(&image).await {
        Ok(text) => text,
        Err(source) => {
            record_outcome("upstream_error");
            return Err(Error::UpstreamFailure {
                service: "vision API",
                source,
            });
        }
    };

    let result = parse(&raw_response);
    if result.found_sections() == 0 {
        warn!("Vision response contained none of the expected sections");
    }

    let mut tx = db::begin_write(&state.db).await?;

    let balance = if cost > 0 {
        let usage = CreditTransactionCreateDBRequest::usage(user.id, cost, format!("Plant analysis: {}", result.name));
        match Credits::new(&mut tx).create_transaction(&usage).await {
            Ok(transaction) => transaction.balance_after,
            Err(DbError::InsufficientBalance { balance, required }) => {
                record_outcome("insufficient_credits");
                return Err(Error::PaymentRequired { balance, required });
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        Credits::new(&mut tx).get_user_balance(user.id).await?
    };

    let record = Analyses::new(&mut tx)
        .create(&AnalysisCreateDBRequest {
            user_id: user.id,
            image_content_type: image.content_type,
            image_base64: image.base64,
            result,
            raw_response,
        })
        .await?;

    tx.commit().await.map_err(DbError::from)?;

    record_outcome("success");
    if cost > 0 {
        counter!("plantlens_credits_debited_total").increment(cost.unsigned_abs());
    }
    info!(analysis_id = %abbrev_uuid(&record.id), plant = %record.result.name, balance, "Stored plant analysis");

    Ok((StatusCode::CREATED, Json(AnalysisResponse::new(record, balance))))
}

/// List analysis history
#[utoipa::path(
    get,
    path = "/analyses",
    tag = "analyses",
    summary = "List analyses",
    description = "Newest first, without the images. Non-admin users see their own history; admins see everyone's, optionally filtered by `user_id`.",
    params(ListAnalysesQuery),
    responses(
        (status = 200, description = "Page of analyses", body = PaginatedResponse<AnalysisSummary>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - cannot access other users' history"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_analyses(
    State(state): State<AppState>,
    Query(query): Query<ListAnalysesQuery>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<AnalysisSummary>>> {
    let (skip, limit) = query.pagination.params();
    let has_read_all = permissions::can_read_all_resources(&current_user, Resource::Analyses);

    let user_id = match query.user_id {
        Some(requested) if !has_read_all && requested != current_user.id => {
            return Err(Error::InsufficientPermissions {
                required: Permission::Allow(Resource::Analyses, Operation::ReadAll),
                action: Operation::ReadAll,
                resource: "analyses".to_string(),
            });
        }
        Some(requested) => Some(requested),
        None if has_read_all => None,
        None => Some(current_user.id),
    };

    let filter = AnalysisFilter::new(user_id, skip, limit);

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let mut repo = Analyses::new(&mut conn);
    let records = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    let data = records.into_iter().map(AnalysisSummary::from).collect();
    Ok(Json(PaginatedResponse::new(data, total_count, skip, limit)))
}

fn analysis_not_found(id: AnalysisId) -> Error {
    Error::NotFound {
        resource: "Analysis".to_string(),
        id: id.to_string(),
    }
}

/// Get one analysis
#[utoipa::path(
    get,
    path = "/analyses/{analysis_id}",
    tag = "analyses",
    summary = "Get analysis",
    params(
        ("analysis_id" = String, Path, description = "Analysis ID (UUID)"),
    ),
    responses(
        (status = 200, description = "Analysis with the raw model answer", body = AnalysisDetail),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Analysis not found"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all, fields(analysis_id = %abbrev_uuid(&analysis_id)))]
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<AnalysisId>,
    current_user: CurrentUser,
) -> Result<Json<AnalysisDetail>> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let record = Analyses::new(&mut conn)
        .get_by_id(analysis_id)
        .await?
        .filter(|record| permissions::can_read(&current_user, Resource::Analyses, record.user_id))
        .ok_or_else(|| analysis_not_found(analysis_id))?;

    Ok(Json(AnalysisDetail::from(record)))
}

/// Download the analyzed photo
#[utoipa::path(
    get,
    path = "/analyses/{analysis_id}/image",
    tag = "analyses",
    summary = "Get analysis image",
    params(
        ("analysis_id" = String, Path, description = "Analysis ID (UUID)"),
    ),
    responses(
        (status = 200, description = "The uploaded image, with its original content type", body = Vec<u8>, content_type = "image/*"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Analysis not found"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all, fields(analysis_id = %abbrev_uuid(&analysis_id)))]
pub async fn get_analysis_image(
    State(state): State<AppState>,
    Path(analysis_id): Path<AnalysisId>,
    current_user: CurrentUser,
) -> Result<impl IntoResponse> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let stored = Analyses::new(&mut conn)
        .get_image(analysis_id)
        .await?
        .filter(|image| permissions::can_read(&current_user, Resource::Analyses, image.user_id))
        .ok_or_else(|| analysis_not_found(analysis_id))?;

    let image = EncodedImage {
        content_type: stored.content_type,
        base64: stored.base64,
    };
    let bytes = image.decode()?;

    Ok(([(header::CONTENT_TYPE, image.content_type)], bytes))
}
