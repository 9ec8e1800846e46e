// tests/download_test.rs
// HttpDownloader against a throwaway local HTTP server

use playcache::download::{
    describe_progress, generate_download_id, progress_percentage, DownloadBackend, DownloadEvent,
    DownloadRequest, DownloadState, HttpDownloader, FINISHED_SESSIONS_KEPT,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Serve one canned response per connection. With `stall`, only the first
/// 16 bytes of the body are written and the connection is kept open.
async fn serve(status: &'static str, body: Vec<u8>, stall: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }

                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                if stall {
                    let _ = socket.write_all(&body[..16]).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                } else {
                    let _ = socket.write_all(&body).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}/videos/clip.mp4", addr)
}

fn downloader() -> HttpDownloader {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    HttpDownloader::with_client(client)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a download event")
        .expect("listener closed")
}

async fn final_event(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> DownloadEvent {
    loop {
        let event = next_event(rx).await;
        if event.is_terminal() {
            return event;
        }
    }
}

#[test]
fn test_progress_helpers() {
    assert_eq!(progress_percentage(50, Some(200)), Some(25));
    assert_eq!(progress_percentage(300, Some(200)), Some(100));
    assert_eq!(progress_percentage(10, None), None);
    assert_eq!(progress_percentage(10, Some(0)), None);

    assert_eq!(describe_progress(512, Some(1024)), "50% (512 B / 1 KiB)");
    assert_eq!(describe_progress(2048, None), "unknown (2 KiB)");
}

#[test]
fn test_download_state_display() {
    assert_eq!(DownloadState::Queued.to_string(), "QUEUED");
    assert_eq!(DownloadState::Downloading.to_string(), "DOWNLOADING");
    assert_eq!(DownloadState::Canceled.to_string(), "CANCELED");

    assert!(DownloadState::Completed.is_terminal());
    assert!(DownloadState::Failed.is_terminal());
    assert!(!DownloadState::Paused.is_terminal());
}

#[test]
fn test_generate_download_id() {
    let a = generate_download_id();
    let b = generate_download_id();

    assert!(a.as_str().starts_with("dl_"));
    assert_eq!(a.as_str().split('_').count(), 3);
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_download_completes() {
    let body: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let url = serve("200 OK", body.clone(), false).await;
    let temp = tempfile::tempdir().unwrap();

    let backend = downloader();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = backend
        .start(
            DownloadRequest {
                url,
                target_dir: temp.path().to_path_buf(),
                file_name: "entry-0-clip.mp4".to_string(),
            },
            tx,
        )
        .await
        .unwrap();

    let mut last_received = 0;
    let path = loop {
        match next_event(&mut rx).await {
            DownloadEvent::Progress {
                id: event_id,
                received,
                total,
            } => {
                assert_eq!(event_id, id);
                assert_eq!(total, Some(body.len() as u64));
                assert!(received >= last_received);
                last_received = received;
            }
            DownloadEvent::Completed { id: event_id, path } => {
                assert_eq!(event_id, id);
                break path;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    };

    assert_eq!(last_received, body.len() as u64);
    assert_eq!(path, temp.path().join("entry-0-clip.mp4"));
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert_eq!(backend.state(&id), Some(DownloadState::Completed));

    // Terminal downloads cannot be canceled
    assert!(backend.cancel(&id).is_err());
}

#[tokio::test]
async fn test_download_http_error_fails() {
    let url = serve("404 Not Found", Vec::new(), false).await;
    let temp = tempfile::tempdir().unwrap();

    let backend = downloader();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = backend
        .start(
            DownloadRequest {
                url,
                target_dir: temp.path().to_path_buf(),
                file_name: "missing.mp4".to_string(),
            },
            tx,
        )
        .await
        .unwrap();

    match final_event(&mut rx).await {
        DownloadEvent::Failed { reason, .. } => assert!(reason.contains("404")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(backend.state(&id), Some(DownloadState::Failed));
    assert!(!temp.path().join("missing.mp4").exists());
}

#[tokio::test]
async fn test_download_cancel_removes_partial_file() {
    let url = serve("200 OK", vec![7u8; 4096], true).await;
    let temp = tempfile::tempdir().unwrap();

    let backend = downloader();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = backend
        .start(
            DownloadRequest {
                url,
                target_dir: temp.path().to_path_buf(),
                file_name: "stalled.mp4".to_string(),
            },
            tx,
        )
        .await
        .unwrap();

    // Wait until bytes are flowing
    match next_event(&mut rx).await {
        DownloadEvent::Progress { received, .. } => assert!(received > 0),
        other => panic!("expected progress, got {:?}", other),
    }
    assert_eq!(backend.state(&id), Some(DownloadState::Downloading));

    backend.cancel(&id).unwrap();

    match final_event(&mut rx).await {
        DownloadEvent::Canceled { id: event_id } => assert_eq!(event_id, id),
        other => panic!("expected cancel, got {:?}", other),
    }
    assert_eq!(backend.state(&id), Some(DownloadState::Canceled));
    assert!(!temp.path().join("stalled.mp4").exists());
}

#[tokio::test]
async fn test_cancel_unknown_download() {
    let backend = downloader();
    let unknown = generate_download_id();
    assert!(backend.cancel(&unknown).is_err());
    assert_eq!(backend.state(&unknown), None);
}

#[tokio::test]
async fn test_finished_sessions_are_pruned() {
    let url = serve("404 Not Found", Vec::new(), false).await;
    let temp = tempfile::tempdir().unwrap();
    let backend = downloader();

    let mut ids = Vec::new();
    for n in 0..=FINISHED_SESSIONS_KEPT {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = backend
            .start(
                DownloadRequest {
                    url: url.clone(),
                    target_dir: temp.path().to_path_buf(),
                    file_name: format!("missing-{}.mp4", n),
                },
                tx,
            )
            .await
            .unwrap();
        assert!(final_event(&mut rx).await.is_terminal());
        ids.push(id);
    }

    // The oldest final state is forgotten, the newest ones are kept
    let oldest = &ids[0];
    assert_eq!(backend.state(oldest), None);
    assert!(backend.cancel(oldest).is_err());

    for id in &ids[1..] {
        assert_eq!(backend.state(id), Some(DownloadState::Failed));
    }
}
