use axum::{
	body::Body,
	extract::{Path, State},
	http::header,
	response::{IntoResponse, Response},
};
use hyper::StatusCode;
use image::ImageFormat;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::{error::AppError, media::MediaStore};

/// Streams a stored image from below the media root.
pub async fn media_handler(media: State<MediaStore>, path: Path<String>) -> Result<Response, AppError> {
	let Some(file_path) = media.resolve(&path.0) else {
		return Err(AppError::NotFound);
	};

	let Some(stream) = read_file_stream(&file_path).await else {
		return Err(AppError::NotFound);
	};

	let content_type = ImageFormat::from_path(&file_path)
		.map(|format| format.to_mime_type())
		.unwrap_or("application/octet-stream");

	Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], Body::from_stream(stream)).into_response())
}

pub async fn read_file_stream(path: &std::path::Path) -> Option<ReaderStream<File>> {
	let file = File::open(path).await.ok()?;
	match file.metadata().await {
		Ok(meta) if meta.is_file() => Some(ReaderStream::new(file)),
		_ => None,
	}
}
