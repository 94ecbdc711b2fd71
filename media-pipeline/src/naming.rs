//! Deterministic naming of local temp paths and remote keys for one upload

use mediavault_types::ContentCategory;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where every artifact of one upload lives, locally and remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    /// Random per-upload folder, shared by all remote keys
    pub folder: String,
    pub extension: String,
    pub category: ContentCategory,

    pub work_dir: PathBuf,
    pub original_path: PathBuf,
    pub preview_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub encrypted_path: PathBuf,

    pub original_key: String,
    pub preview_key: String,
    pub thumbnail_key: String,
    pub encrypted_key: String,
}

impl ArtifactNames {
    /// Derive all names for an upload. Draws one random folder id; does no I/O.
    pub fn derive(temp_root: &Path, original_name: &str, content_type: &str, owner_id: Uuid) -> Self {
        Self::with_folder(
            temp_root,
            Uuid::new_v4().simple().to_string(),
            original_name,
            content_type,
            owner_id,
        )
    }

    pub fn with_folder(
        temp_root: &Path,
        folder: String,
        original_name: &str,
        content_type: &str,
        owner_id: Uuid,
    ) -> Self {
        let category = ContentCategory::from_content_type(content_type);
        let extension = extension_for(original_name, content_type);
        let work_dir = temp_root.join(owner_id.simple().to_string()).join(&folder);

        let encrypted_name = match category {
            ContentCategory::Video | ContentCategory::Audio => "encrypted.mpd".to_string(),
            ContentCategory::File => format!("encrypted{}", extension),
        };
        let original_name = format!("original{}", extension);

        Self {
            original_path: work_dir.join(&original_name),
            preview_path: work_dir.join("preview.mp4"),
            thumbnail_path: work_dir.join("thumbnail.jpg"),
            encrypted_path: work_dir.join(&encrypted_name),
            original_key: remote_key(&folder, &original_name),
            preview_key: remote_key(&folder, "preview.mp4"),
            thumbnail_key: remote_key(&folder, "thumbnail.jpg"),
            encrypted_key: remote_key(&folder, &encrypted_name),
            folder,
            extension,
            category,
            work_dir,
        }
    }

    /// Key of a further artifact (DASH init segments and the like) in this folder
    pub fn key_for(&self, file_name: &str) -> String {
        remote_key(&self.folder, file_name)
    }
}

pub fn remote_key(folder: &str, artifact: &str) -> String {
    format!("{}/{}", folder, artifact)
}

/// File extension, with leading dot, from the original name or else the
/// content type. Empty when neither gives one.
pub fn extension_for(original_name: &str, content_type: &str) -> String {
    let from_name = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()));

    from_name.unwrap_or_else(|| {
        let ext = match content_type.trim().to_ascii_lowercase().as_str() {
            "video/mp4" => ".mp4",
            "video/quicktime" => ".mov",
            "video/webm" => ".webm",
            "audio/mpeg" => ".mp3",
            "audio/mp4" => ".m4a",
            "audio/wav" | "audio/x-wav" => ".wav",
            "audio/flac" => ".flac",
            "image/png" => ".png",
            "image/jpeg" => ".jpg",
            "image/gif" => ".gif",
            "image/webp" => ".webp",
            "application/pdf" => ".pdf",
            "application/zip" => ".zip",
            _ => "",
        };
        ext.to_string()
    })
}
