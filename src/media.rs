use std::path::{Component, Path, PathBuf};

use image::ImageFormat;
use uuid::Uuid;

use crate::{error::AppError, forms::UploadedFile, gallery::ImageOwner, links::RequestBase};

const INVALID_IMAGE: &str = "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// Uploaded image that decoded successfully and is ready to be written.
#[derive(Debug)]
pub struct CheckedImage {
	pub data: bytes::Bytes,
	pub extension: String,
}

/// Image written to disk; `path` is relative to the media root.
#[derive(Debug, Clone)]
pub struct StoredImage {
	pub path: String,
}

/// Filesystem blob storage for gallery images.
#[derive(Debug, Clone)]
pub struct MediaStore {
	root: PathBuf,
	url_prefix: String,
}

impl MediaStore {
	pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
		MediaStore {
			root: root.into(),
			url_prefix: url_prefix.into(),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Decodes every upload; the first bad one fails the whole batch under `field`.
	pub fn check(&self, field: &str, files: Vec<UploadedFile>) -> Result<Vec<CheckedImage>, AppError> {
		files
			.into_iter()
			.map(|file| {
				let format = image::guess_format(&file.data).map_err(|_| AppError::field(field, INVALID_IMAGE))?;
				image::load_from_memory_with_format(&file.data, format).map_err(|_| AppError::field(field, INVALID_IMAGE))?;
				Ok(CheckedImage {
					extension: extension_for(file.file_name.as_deref(), format),
					data: file.data,
				})
			})
			.collect()
	}

	pub async fn store(&self, owner: ImageOwner, owner_id: Uuid, images: Vec<CheckedImage>) -> Result<Vec<StoredImage>, AppError> {
		if images.is_empty() {
			return Ok(Vec::new());
		}

		let dir = format!("{}/{}", owner.media_dir(), owner_id);
		tokio::fs::create_dir_all(self.root.join(&dir)).await?;

		let mut stored = Vec::with_capacity(images.len());
		for image in images {
			let path = format!("{}/{}.{}", dir, Uuid::new_v4(), image.extension);
			if let Err(e) = tokio::fs::write(self.root.join(&path), &image.data).await {
				self.discard(&stored).await;
				return Err(e.into());
			}
			stored.push(StoredImage { path });
		}

		Ok(stored)
	}

	/// Best-effort removal of files whose rows were never written. The owner
	/// directory goes too when nothing else is left in it.
	pub async fn discard(&self, images: &[StoredImage]) {
		for image in images {
			self.remove(&image.path).await;
		}

		let Some(dir) = images.first().and_then(|image| self.root.join(&image.path).parent().map(Path::to_path_buf)) else {
			return;
		};
		// remove_dir only succeeds on an empty directory
		let _ = tokio::fs::remove_dir(&dir).await;
	}

	pub async fn remove(&self, path: &str) {
		if let Err(e) = tokio::fs::remove_file(self.root.join(path)).await {
			log::warn!("failed to remove media file {}: {}", path, e);
		}
	}

	pub async fn remove_owner(&self, owner: ImageOwner, owner_id: Uuid) {
		let dir = self.root.join(owner.media_dir()).join(owner_id.to_string());
		match tokio::fs::remove_dir_all(&dir).await {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => log::warn!("failed to remove media directory {}: {}", dir.display(), e),
		}
	}

	pub fn url(&self, base: &RequestBase, path: &str) -> String {
		base.absolute(&format!("{}{}", self.url_prefix, path))
	}

	/// Maps a request path below the media root to a file, rejecting
	/// anything that would escape it.
	pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
		let relative = Path::new(relative.trim_start_matches('/'));
		if relative.as_os_str().is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
			return None;
		}
		Some(self.root.join(relative))
	}
}

fn extension_for(file_name: Option<&str>, format: ImageFormat) -> String {
	let from_name = file_name
		.and_then(|name| Path::new(name).extension())
		.and_then(|ext| ext.to_str())
		.map(str::to_ascii_lowercase)
		.filter(|ext| ImageFormat::from_extension(ext) == Some(format));

	from_name.unwrap_or_else(|| format.extensions_str().first().copied().unwrap_or("img").to_owned())
}
