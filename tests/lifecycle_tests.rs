use std::sync::Arc;
use std::time::Duration;

use filedrop::cleaner::Cleaner;
use filedrop::data::{DataBackend, LocalDataBackend, StreamBackend};
use filedrop::metadata::{MetadataBackend, RedbMetadataBackend};
use filedrop::model::FileStatus;
use filedrop::service::{AddFile, CreateUpload, Credentials, ServiceError, UploadService};

const DAY: i64 = 86_400;

fn test_stack(
    dir: &tempfile::TempDir,
    default_ttl: i64,
    max_ttl: i64,
) -> (Arc<UploadService>, Cleaner) {
    let metadata: Arc<dyn MetadataBackend> =
        Arc::new(RedbMetadataBackend::open(dir.path().join("meta")).unwrap());
    let data: Arc<dyn DataBackend> =
        Arc::new(LocalDataBackend::new(dir.path().join("files")).unwrap());
    let stream_data: Arc<dyn DataBackend> = Arc::new(StreamBackend::new(Duration::from_secs(2)));

    let service = Arc::new(UploadService::new(
        Arc::clone(&metadata),
        Arc::clone(&data),
        Some(stream_data),
        default_ttl,
        max_ttl,
    ));
    let cleaner = Cleaner::new(
        metadata,
        data,
        Duration::from_secs(60),
        Duration::from_secs(120),
    );
    (service, cleaner)
}

fn body(content: &[u8]) -> Box<std::io::Cursor<Vec<u8>>> {
    Box::new(std::io::Cursor::new(content.to_vec()))
}

async fn read_all(mut stream: Box<dyn tokio::io::AsyncRead + Send + Unpin>) -> Vec<u8> {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn test_create_upload_applies_default_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service.create_upload(CreateUpload::default()).unwrap();
    assert_eq!(upload.ttl, DAY);
    let expire_at = upload.expire_at.unwrap();
    assert_eq!(expire_at, upload.created_at + chrono::Duration::seconds(DAY));
    assert!(upload.token.is_some());
}

#[tokio::test]
async fn test_create_upload_rejects_excessive_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let err = service
        .create_upload(CreateUpload {
            ttl: 31 * DAY,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRequest(_)), "got {err:?}");
}

#[tokio::test]
async fn test_infinite_ttl_policy() {
    let dir = tempfile::tempdir().unwrap();

    // Bounded server: negative TTL is refused.
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);
    let err = service
        .create_upload(CreateUpload {
            ttl: -1,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRequest(_)));

    // Unbounded server: the upload simply never expires.
    let dir2 = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir2, DAY, -1);
    let upload = service
        .create_upload(CreateUpload {
            ttl: -1,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(upload.ttl, -1);
    assert!(upload.expire_at.is_none());
}

#[tokio::test]
async fn test_upload_and_download_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service.create_upload(CreateUpload::default()).unwrap();
    let token = upload.token.as_deref();

    let file = service
        .add_file(
            &upload.id,
            token,
            AddFile {
                name: "notes.txt".to_string(),
                declared_type: None,
            },
            body(b"important notes"),
        )
        .await
        .unwrap();

    assert_eq!(file.status, FileStatus::Uploaded);
    assert_eq!(file.size, 15);
    assert_eq!(
        file.md5.as_deref(),
        Some(format!("{:x}", md5::compute(b"important notes")).as_str())
    );
    assert_eq!(file.detected_type.as_deref(), Some("text/plain"));

    let (served, stream) = service.get_file(&upload.id, &file.id, None).await.unwrap();
    assert_eq!(served.name, "notes.txt");
    assert_eq!(read_all(stream).await, b"important notes");
}

#[tokio::test]
async fn test_add_file_requires_token() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service.create_upload(CreateUpload::default()).unwrap();
    let params = AddFile {
        name: "x.bin".to_string(),
        declared_type: None,
    };

    let err = service
        .add_file(&upload.id, Some("wrong-token"), params, body(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)), "got {err:?}");
}

#[tokio::test]
async fn test_one_shot_single_download() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service
        .create_upload(CreateUpload {
            one_shot: true,
            ..Default::default()
        })
        .unwrap();
    let file = service
        .add_file(
            &upload.id,
            upload.token.as_deref(),
            AddFile {
                name: "secret.bin".to_string(),
                declared_type: None,
            },
            body(b"only once"),
        )
        .await
        .unwrap();

    let (_, stream) = service.get_file(&upload.id, &file.id, None).await.unwrap();
    assert_eq!(read_all(stream).await, b"only once");

    let result = service.get_file(&upload.id, &file.id, None).await.map(|_| ());
    assert!(matches!(result, Err(ServiceError::NotFound)), "got {result:?}");
}

#[tokio::test]
async fn test_one_shot_claim_survives_missing_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service
        .create_upload(CreateUpload {
            one_shot: true,
            ..Default::default()
        })
        .unwrap();
    let file = service
        .add_file(
            &upload.id,
            upload.token.as_deref(),
            AddFile {
                name: "precious.bin".to_string(),
                declared_type: None,
            },
            body(b"precious"),
        )
        .await
        .unwrap();

    // Drop the bytes behind the service's back.
    let data = LocalDataBackend::new(dir.path().join("files")).unwrap();
    data.remove_file(&file).await.unwrap();

    let result = service.get_file(&upload.id, &file.id, None).await.map(|_| ());
    assert!(matches!(result, Err(ServiceError::NotFound)));

    // The failed read must not consume the single download.
    let stored = service.metadata().get_upload(&upload.id).unwrap().unwrap();
    assert_eq!(stored.files[&file.id].status, FileStatus::Uploaded);

    // Once the bytes are back, the download is still available exactly once.
    data.add_file(&file, body(b"precious")).await.unwrap();
    let (_, stream) = service.get_file(&upload.id, &file.id, None).await.unwrap();
    assert_eq!(read_all(stream).await, b"precious");
    let result = service.get_file(&upload.id, &file.id, None).await.map(|_| ());
    assert!(matches!(result, Err(ServiceError::NotFound)));
}

#[tokio::test]
async fn test_password_protected_download() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service
        .create_upload(CreateUpload {
            login: Some("alice".to_string()),
            password: Some("hunter2".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(upload.is_password_protected());

    let file = service
        .add_file(
            &upload.id,
            upload.token.as_deref(),
            AddFile {
                name: "private.txt".to_string(),
                declared_type: None,
            },
            body(b"private"),
        )
        .await
        .unwrap();

    let result = service.get_file(&upload.id, &file.id, None).await.map(|_| ());
    assert!(matches!(result, Err(ServiceError::Unauthorized)));

    let wrong = Credentials {
        login: "alice".to_string(),
        password: "nope".to_string(),
    };
    let result = service
        .get_file(&upload.id, &file.id, Some(wrong))
        .await
        .map(|_| ());
    assert!(matches!(result, Err(ServiceError::Unauthorized)));

    let right = Credentials {
        login: "alice".to_string(),
        password: "hunter2".to_string(),
    };
    let (_, stream) = service
        .get_file(&upload.id, &file.id, Some(right))
        .await
        .unwrap();
    assert_eq!(read_all(stream).await, b"private");
}

#[tokio::test]
async fn test_remove_file_policy() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    // Non-removable upload: only the creator token may remove files.
    let locked = service.create_upload(CreateUpload::default()).unwrap();
    let file = service
        .add_file(
            &locked.id,
            locked.token.as_deref(),
            AddFile {
                name: "a.txt".to_string(),
                declared_type: None,
            },
            body(b"a"),
        )
        .await
        .unwrap();

    let err = service.remove_file(&locked.id, &file.id, None).unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    service
        .remove_file(&locked.id, &file.id, locked.token.as_deref())
        .unwrap();
    // A removed file is gone from the download surface immediately.
    let result = service.get_file(&locked.id, &file.id, None).await.map(|_| ());
    assert!(matches!(result, Err(ServiceError::NotFound)));
    // Removing it again reports not found.
    let err = service
        .remove_file(&locked.id, &file.id, locked.token.as_deref())
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));

    // Removable upload: anyone may remove files.
    let open = service
        .create_upload(CreateUpload {
            removable: true,
            ..Default::default()
        })
        .unwrap();
    let file = service
        .add_file(
            &open.id,
            open.token.as_deref(),
            AddFile {
                name: "b.txt".to_string(),
                declared_type: None,
            },
            body(b"b"),
        )
        .await
        .unwrap();
    service.remove_file(&open.id, &file.id, None).unwrap();
}

#[tokio::test]
async fn test_remove_upload_deletes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service.create_upload(CreateUpload::default()).unwrap();
    let token = upload.token.as_deref();
    service
        .add_file(
            &upload.id,
            token,
            AddFile {
                name: "doomed.txt".to_string(),
                declared_type: None,
            },
            body(b"doomed"),
        )
        .await
        .unwrap();

    let err = service.remove_upload(&upload.id, None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    service.remove_upload(&upload.id, token).await.unwrap();
    let err = service.get_upload(&upload.id).unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
}

#[tokio::test]
async fn test_expired_upload_reads_as_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service
        .create_upload(CreateUpload {
            ttl: 1,
            ..Default::default()
        })
        .unwrap();
    let file = service
        .add_file(
            &upload.id,
            upload.token.as_deref(),
            AddFile {
                name: "fleeting.txt".to_string(),
                declared_type: None,
            },
            body(b"fleeting"),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let err = service.get_upload(&upload.id).unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
    let result = service.get_file(&upload.id, &file.id, None).await.map(|_| ());
    assert!(matches!(result, Err(ServiceError::NotFound)));
}

#[tokio::test]
async fn test_cleaning_pass_purges_expired_upload() {
    let dir = tempfile::tempdir().unwrap();
    let (service, cleaner) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service
        .create_upload(CreateUpload {
            ttl: 1,
            ..Default::default()
        })
        .unwrap();
    service
        .add_file(
            &upload.id,
            upload.token.as_deref(),
            AddFile {
                name: "trash.bin".to_string(),
                declared_type: None,
            },
            body(b"trash"),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let stats = cleaner.clean().await;
    assert_eq!(stats.expired_uploads, 1);
    assert_eq!(stats.purged_files, 1);
    assert_eq!(stats.purged_uploads, 1);
    assert_eq!(stats.errors, 0);

    // Metadata record is gone, not just hidden.
    assert!(service.metadata().get_upload(&upload.id).unwrap().is_none());

    // A second pass finds nothing left to do.
    let stats = cleaner.clean().await;
    assert_eq!(stats, Default::default());
}

#[tokio::test]
async fn test_cleaning_pass_purges_one_shot_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (service, cleaner) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service
        .create_upload(CreateUpload {
            one_shot: true,
            ..Default::default()
        })
        .unwrap();
    let file = service
        .add_file(
            &upload.id,
            upload.token.as_deref(),
            AddFile {
                name: "once.bin".to_string(),
                declared_type: None,
            },
            body(b"once"),
        )
        .await
        .unwrap();
    let (_, stream) = service.get_file(&upload.id, &file.id, None).await.unwrap();
    read_all(stream).await;

    let stats = cleaner.clean().await;
    // Bytes purged, but the upload itself lives until it expires.
    assert_eq!(stats.purged_files, 1);
    assert_eq!(stats.purged_uploads, 0);

    let retrieved = service.get_upload(&upload.id).unwrap();
    assert_eq!(
        retrieved.files.get(&file.id).unwrap().status,
        FileStatus::Deleted
    );
}

#[tokio::test]
async fn test_stream_upload_through_service() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service
        .create_upload(CreateUpload {
            stream: true,
            ..Default::default()
        })
        .unwrap();
    let upload_id = upload.id.clone();
    let token = upload.token.clone();

    let uploader = tokio::spawn({
        let service = Arc::clone(&service);
        async move {
            service
                .add_file(
                    &upload_id,
                    token.as_deref(),
                    AddFile {
                        name: "live.bin".to_string(),
                        declared_type: None,
                    },
                    body(b"streamed through"),
                )
                .await
        }
    });

    // The descriptor appears (status uploading) while the uploader blocks
    // in the rendezvous; that is how the downloader learns the file id.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let pending = service.get_upload(&upload.id).unwrap();
    assert_eq!(pending.files.len(), 1);
    let file_id = pending.files.keys().next().unwrap().clone();
    assert_eq!(
        pending.files[&file_id].status,
        FileStatus::Uploading
    );

    let (_, stream) = service.get_file(&upload.id, &file_id, None).await.unwrap();
    assert_eq!(read_all(stream).await, b"streamed through");

    let file = uploader.await.unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Downloaded);
    assert_eq!(file.size, 16);

    // Nothing was persisted; the file cannot be fetched again.
    let result = service.get_file(&upload.id, &file_id, None).await.map(|_| ());
    assert!(matches!(result, Err(ServiceError::NotFound)));
}

#[tokio::test]
async fn test_sanitized_upload_hides_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = test_stack(&dir, DAY, 30 * DAY);

    let upload = service
        .create_upload(CreateUpload {
            password: Some("s3cret".to_string()),
            remote_ip: Some("203.0.113.7".to_string()),
            comment: Some("visible".to_string()),
            ..Default::default()
        })
        .unwrap();

    let sanitized = upload.sanitized();
    assert!(sanitized.token.is_none());
    assert!(sanitized.password_hash.is_none());
    assert!(sanitized.remote_ip.is_none());
    assert_eq!(sanitized.comment.as_deref(), Some("visible"));
}
