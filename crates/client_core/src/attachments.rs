use std::{path::Path, sync::Arc};

use shared::{domain::AttachmentKind, domain::UserId, protocol::AttachmentUpload};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    context::ClientContext,
    error::{Rejection, SyncError, SyncResult},
    transport::AttachmentStore,
};

/// A user-picked file waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl OutgoingFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Declared content type, else a guess from the file name.
    pub fn resolved_content_type(&self) -> String {
        self.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
    }

    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| extension_for_mime(&self.resolved_content_type()))
    }
}

/// File extension for a content type, ignoring codec parameters.
pub fn extension_for_mime(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    match essence {
        "audio/webm" => "webm".to_string(),
        "audio/mp4" => "m4a".to_string(),
        "audio/wav" | "audio/x-wav" => "wav".to_string(),
        _ => mime_guess::get_mime_extensions_str(essence)
            .and_then(|exts| exts.first())
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| "bin".to_string()),
    }
}

/// Uploads blobs for image, document and voice messages and hands back the
/// public URL that goes into the message row.
pub struct AttachmentCoordinator {
    store: Arc<dyn AttachmentStore>,
    owner_id: UserId,
    max_bytes: u64,
}

impl AttachmentCoordinator {
    pub fn new(context: &ClientContext, store: Arc<dyn AttachmentStore>) -> Self {
        Self {
            store,
            owner_id: context.self_id().clone(),
            max_bytes: context.settings().max_attachment_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn check_size(&self, size: u64) -> Result<(), Rejection> {
        if size > self.max_bytes {
            return Err(Rejection::AttachmentTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    pub fn object_name(&self, extension: &str) -> String {
        format!("{}/{}.{}", self.owner_id, Uuid::new_v4(), extension)
    }

    pub async fn upload(
        &self,
        kind: AttachmentKind,
        content_type: String,
        extension: &str,
        bytes: Vec<u8>,
    ) -> SyncResult<String> {
        self.check_size(bytes.len() as u64)?;
        let upload = AttachmentUpload {
            owner_id: self.owner_id.clone(),
            kind,
            object_name: self.object_name(extension),
            content_type,
            bytes,
        };
        let path = upload.object_path();
        let size = upload.bytes.len();
        match self.store.upload(upload).await {
            Ok(url) => {
                info!(path = %path, size, "attachment uploaded");
                Ok(url)
            }
            Err(err) => {
                warn!(path = %path, error = %err, "attachment upload failed");
                Err(SyncError::transport(err))
            }
        }
    }

    pub async fn upload_file(&self, kind: AttachmentKind, file: &OutgoingFile) -> SyncResult<String> {
        let extension = file.extension();
        self.upload(
            kind,
            file.resolved_content_type(),
            &extension,
            file.bytes.clone(),
        )
        .await
    }
}

#[cfg(test)]
#[path = "tests/attachments_tests.rs"]
mod tests;
