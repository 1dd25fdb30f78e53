use super::*;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::SyncSettings;

#[derive(Default)]
struct RecordingStore {
    uploads: Mutex<Vec<AttachmentUpload>>,
    fail: bool,
}

#[async_trait]
impl AttachmentStore for RecordingStore {
    async fn upload(&self, upload: AttachmentUpload) -> anyhow::Result<String> {
        if self.fail {
            return Err(anyhow!("bucket offline"));
        }
        let url = format!("https://files.test/{}", upload.object_path());
        self.uploads.lock().push(upload);
        Ok(url)
    }
}

fn coordinator(store: Arc<RecordingStore>) -> AttachmentCoordinator {
    let context = ClientContext::new(UserId::new("owner-1"), SyncSettings::default());
    AttachmentCoordinator::new(&context, store)
}

#[tokio::test]
async fn uploads_into_kind_bucket_under_owner_prefix() {
    let store = Arc::new(RecordingStore::default());
    let attachments = coordinator(Arc::clone(&store));
    let file = OutgoingFile::new("Report.PDF", b"%PDF".to_vec());

    let url = attachments
        .upload_file(AttachmentKind::Document, &file)
        .await
        .expect("upload");

    let uploads = store.uploads.lock();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.bucket(), "chat-documents");
    assert!(upload.object_name.starts_with("owner-1/"));
    assert!(upload.object_name.ends_with(".pdf"));
    assert_eq!(upload.content_type, "application/pdf");
    assert!(url.contains("chat-documents/owner-1/"));
}

#[tokio::test]
async fn oversized_files_are_rejected_before_upload() {
    let store = Arc::new(RecordingStore::default());
    let attachments = coordinator(Arc::clone(&store));
    let file = OutgoingFile::new("big.png", vec![0u8; 10 * 1024 * 1024 + 1]);

    let err = attachments
        .upload_file(AttachmentKind::Image, &file)
        .await
        .expect_err("too large");

    assert!(matches!(
        err,
        SyncError::ValidationRejected(Rejection::AttachmentTooLarge { .. })
    ));
    assert!(store.uploads.lock().is_empty());
}

#[tokio::test]
async fn store_failures_map_to_transport_failure() {
    let store = Arc::new(RecordingStore {
        fail: true,
        ..Default::default()
    });
    let attachments = coordinator(store);
    let err = attachments
        .upload(AttachmentKind::Voice, "audio/wav".into(), "wav", vec![1, 2, 3])
        .await
        .expect_err("store offline");
    assert!(matches!(err, SyncError::TransportFailure(_)));
    assert!(err.is_recoverable());
}

#[test]
fn extensions_follow_audio_mime_types() {
    assert_eq!(extension_for_mime("audio/webm;codecs=opus"), "webm");
    assert_eq!(extension_for_mime("audio/mp4;codecs=mp4a.40.2"), "m4a");
    assert_eq!(extension_for_mime("audio/wav"), "wav");
    assert_eq!(
        OutgoingFile::new("photo.JPG", Vec::new()).resolved_content_type(),
        "image/jpeg"
    );
}
