use std::sync::Arc;
use std::time::Duration;

use filedrop::data::{DataBackend, DataError, LocalDataBackend, StreamBackend};
use filedrop::model::{File, Upload};
use tokio::io::AsyncReadExt;

fn sample_file() -> File {
    let upload = Upload::new();
    File::new(&upload.id, "sample.bin")
}

fn reader(content: &[u8]) -> Box<std::io::Cursor<Vec<u8>>> {
    Box::new(std::io::Cursor::new(content.to_vec()))
}

async fn read_all(mut stream: Box<dyn tokio::io::AsyncRead + Send + Unpin>) -> Vec<u8> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn test_local_add_and_get_file() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalDataBackend::new(dir.path()).unwrap();
    let file = sample_file();

    let written = backend.add_file(&file, reader(b"hello world")).await.unwrap();
    assert_eq!(written, 11);

    let stream = backend.get_file(&file).await.unwrap();
    assert_eq!(read_all(stream).await, b"hello world");
}

#[tokio::test]
async fn test_local_sharded_layout() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalDataBackend::new(dir.path()).unwrap();
    let mut file = sample_file();
    file.id = "ab12cd34".to_string();

    backend.add_file(&file, reader(b"x")).await.unwrap();

    // Objects live under a directory named after the first two id chars.
    assert!(dir.path().join("ab").join("ab12cd34").is_file());
}

#[tokio::test]
async fn test_local_get_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalDataBackend::new(dir.path()).unwrap();

    let result = backend.get_file(&sample_file()).await.map(|_| ());
    assert!(matches!(result, Err(DataError::NotFound(_))), "got {result:?}");
}

#[tokio::test]
async fn test_local_reads_legacy_layout() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalDataBackend::new(dir.path()).unwrap();
    let file = sample_file();

    // Data written by older versions sits in a per-upload directory.
    let legacy_dir = dir
        .path()
        .join(&file.upload_id[..2])
        .join(&file.upload_id);
    std::fs::create_dir_all(&legacy_dir).unwrap();
    std::fs::write(legacy_dir.join(&file.id), b"old bytes").unwrap();

    let stream = backend.get_file(&file).await.unwrap();
    assert_eq!(read_all(stream).await, b"old bytes");

    backend.remove_file(&file).await.unwrap();
    let result = backend.get_file(&file).await.map(|_| ());
    assert!(matches!(result, Err(DataError::NotFound(_))));
}

#[tokio::test]
async fn test_local_remove_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalDataBackend::new(dir.path()).unwrap();
    let file = sample_file();

    backend.add_file(&file, reader(b"bytes")).await.unwrap();
    backend.remove_file(&file).await.unwrap();
    backend.remove_file(&file).await.unwrap();
}

#[tokio::test]
async fn test_local_remove_upload() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalDataBackend::new(dir.path()).unwrap();

    let mut upload = Upload::new();
    let first = File::new(&upload.id, "a.txt");
    let second = File::new(&upload.id, "b.txt");
    backend.add_file(&first, reader(b"a")).await.unwrap();
    backend.add_file(&second, reader(b"b")).await.unwrap();
    upload.files.insert(first.id.clone(), first.clone());
    upload.files.insert(second.id.clone(), second.clone());

    backend.remove_upload(&upload).await.unwrap();

    assert!(backend.get_file(&first).await.is_err());
    assert!(backend.get_file(&second).await.is_err());
}

#[tokio::test]
async fn test_local_rejects_short_ids() {
    let dir = tempfile::tempdir().unwrap();
    let backend = LocalDataBackend::new(dir.path()).unwrap();
    let mut file = sample_file();
    file.id = "ab".to_string();

    let err = backend.add_file(&file, reader(b"x")).await.unwrap_err();
    assert!(matches!(err, DataError::InvalidId(_)), "got {err:?}");
}

#[tokio::test]
async fn test_stream_download_before_upload_fails_fast() {
    let backend = StreamBackend::new(Duration::from_secs(5));
    let result = backend.get_file(&sample_file()).await.map(|_| ());
    assert!(matches!(result, Err(DataError::NotFound(_))), "got {result:?}");
}

#[tokio::test]
async fn test_stream_rendezvous_round_trip() {
    let backend = Arc::new(StreamBackend::new(Duration::from_secs(5)));
    let file = sample_file();

    let uploader = tokio::spawn({
        let backend = Arc::clone(&backend);
        let file = file.clone();
        async move { backend.add_file(&file, reader(b"streamed payload")).await }
    });

    // Let the uploader register before attaching.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = backend.get_file(&file).await.unwrap();
    assert_eq!(read_all(stream).await, b"streamed payload");

    let written = uploader.await.unwrap().unwrap();
    assert_eq!(written, 16);

    // The pending entry is consumed; a second download finds nothing.
    let result = backend.get_file(&file).await.map(|_| ());
    assert!(matches!(result, Err(DataError::NotFound(_))));
}

#[tokio::test]
async fn test_stream_upload_times_out_without_downloader() {
    let backend = StreamBackend::new(Duration::from_millis(100));
    let file = sample_file();

    let err = backend.add_file(&file, reader(b"nobody wants me")).await.unwrap_err();
    assert!(matches!(err, DataError::Timeout(_)), "got {err:?}");

    // The timed-out entry must not linger in the registry.
    let result = backend.get_file(&file).await.map(|_| ());
    assert!(matches!(result, Err(DataError::NotFound(_))));
}

#[tokio::test]
async fn test_stream_large_body_crosses_chunks() {
    let backend = Arc::new(StreamBackend::new(Duration::from_secs(5)));
    let file = sample_file();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let uploader = tokio::spawn({
        let backend = Arc::clone(&backend);
        let file = file.clone();
        let payload = payload.clone();
        async move { backend.add_file(&file, Box::new(std::io::Cursor::new(payload))).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = backend.get_file(&file).await.unwrap();
    assert_eq!(read_all(stream).await, payload);
    assert_eq!(uploader.await.unwrap().unwrap(), payload.len() as u64);
}
