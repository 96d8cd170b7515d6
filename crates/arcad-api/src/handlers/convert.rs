//! Conversion handler: multipart CAD upload in, GLB bytes out.

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use tracing::{debug, info};

use arcad_converter::{ConversionError, ConvertedAsset, MeshFormat, StagedUpload, UploadSink};
use arcad_core::error::AppError;

use crate::error::ApiError;
use crate::state::AppState;

/// Name of the multipart field carrying the model.
const FILE_FIELD: &str = "file";

/// POST /convert: convert one uploaded model to GLB.
///
/// The first part that is named `file` or carries a filename is taken as the
/// upload. Anything after it is ignored.
pub async fn convert(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        AppError::validation(format!(
            "Expected a multipart/form-data body with a '{FILE_FIELD}' part: {}",
            e.body_text()
        ))
    })?;

    let staged = stage_upload(&state, &mut multipart).await?;
    info!(
        file = %staged.original_name,
        format = %staged.format,
        size = staged.size,
        "Upload staged"
    );

    let asset = state.processor.convert(staged).await?;
    build_response(asset)
}

/// Find the file part and stream it to the upload directory.
async fn stage_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<StagedUpload, ApiError> {
    let limit = state.config.storage.max_upload_bytes;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let is_file = field.name() == Some(FILE_FIELD) || field.file_name().is_some();
        if !is_file {
            debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            return Err(AppError::validation(format!(
                "The '{FILE_FIELD}' part has no filename; supported formats: {}",
                MeshFormat::supported_list()
            ))
            .into());
        };

        let mut sink = UploadSink::create(state.processor.upload_dir(), &file_name, limit).await?;
        return match stream_field(field, &mut sink).await {
            Ok(()) => Ok(sink.finish().await?),
            Err(e) => {
                sink.discard().await;
                Err(e)
            }
        };
    }

    Err(ConversionError::MissingFile.into())
}

async fn stream_field(mut field: Field<'_>, sink: &mut UploadSink) -> Result<(), ApiError> {
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        sink.write(&chunk).await?;
    }
    Ok(())
}

/// Body-limit hits surface as multipart errors carrying 413.
fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large(format!("Upload too large: {}", err.body_text())).into()
    } else {
        AppError::validation(format!("Malformed multipart body: {}", err.body_text())).into()
    }
}

fn build_response(asset: ConvertedAsset) -> Result<Response, ApiError> {
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&asset.file_name),
        )
        .header(header::CONTENT_LENGTH, asset.len())
        .body(Body::from(asset.data))
        .map_err(|e| AppError::internal(format!("Response build failed: {e}")))?;

    Ok(response)
}

/// `inline; filename="..."`, with an RFC 5987 `filename*` added when the
/// name is not plain ASCII.
pub fn content_disposition(file_name: &str) -> String {
    let mut fallback = String::with_capacity(file_name.len());
    for c in file_name.chars() {
        match c {
            '"' | '\\' => {
                fallback.push('\\');
                fallback.push(c);
            }
            c if c.is_control() => {}
            c if !c.is_ascii() => fallback.push('_'),
            c => fallback.push(c),
        }
    }

    if file_name.is_ascii() {
        format!("inline; filename=\"{fallback}\"")
    } else {
        format!(
            "inline; filename=\"{fallback}\"; filename*=UTF-8''{}",
            percent_encode(file_name)
        )
    }
}

/// RFC 5987 `attr-char` encoding.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
