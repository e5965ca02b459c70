//! Package file responses.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use tokio::fs::File;
use tokio::time::Sleep;
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::admission::HeldPermit;
use crate::common::{DepotError, DepotResult};
use crate::manifest::PackageRef;

/// Open the package file, then stream it as an attachment.
///
/// The file is opened before any byte is sent, so a missing package answers
/// 404 instead of a truncated 200. Symlinks are followed only while the
/// real file stays inside `package_dir`.
pub async fn package_attachment(
    package: &PackageRef,
    package_dir: &Path,
    deadline: Duration,
    permit: Option<HeldPermit>,
) -> DepotResult<Response> {
    let real_path = match contained_path(package_dir, &package.path).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            warn!(
                "Package file for {} resolves outside the package store: {:?}",
                package.version, package.path
            );
            return Err(DepotError::NotFound(package.version.clone()));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(
                "Package file for {} missing at {:?}",
                package.version, package.path
            );
            return Err(DepotError::NotFound(package.version.clone()));
        }
        Err(e) => return Err(e.into()),
    };

    let file = match File::open(&real_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DepotError::NotFound(package.version.clone()));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        warn!("Package path for {} is not a file: {:?}", package.version, package.path);
        return Err(DepotError::NotFound(package.version.clone()));
    }

    let stream = DeadlineStream::new(ReaderStream::new(file), deadline, permit);
    let file_name = package.file_name().unwrap_or("package");

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_LENGTH, HeaderValue::from(metadata.len())),
            (header::CONTENT_DISPOSITION, content_disposition(file_name)),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Real location of `path` if it lies inside the real `root`.
async fn contained_path(root: &Path, path: &Path) -> io::Result<Option<PathBuf>> {
    let real_root = tokio::fs::canonicalize(root).await?;
    let real_path = tokio::fs::canonicalize(path).await?;
    Ok(real_path.starts_with(&real_root).then_some(real_path))
}

/// `attachment` disposition carrying the file's base name.
pub fn content_disposition(file_name: &str) -> HeaderValue {
    let plain = file_name
        .chars()
        .all(|c| (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ');

    let value = if plain {
        format!("attachment; filename=\"{}\"", file_name)
    } else {
        format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(file_name)
        )
    };

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Ends a body stream with an error once `deadline` has passed, and keeps
/// the admission slot occupied until the body is done.
pub struct DeadlineStream<S> {
    inner: S,
    deadline: Pin<Box<Sleep>>,
    _permit: Option<HeldPermit>,
    expired: bool,
}

impl<S> DeadlineStream<S> {
    pub fn new(inner: S, deadline: Duration, permit: Option<HeldPermit>) -> Self {
        Self {
            inner,
            deadline: Box::pin(tokio::time::sleep(deadline)),
            _permit: permit,
            expired: false,
        }
    }
}

impl<S> Stream for DeadlineStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.expired {
            return Poll::Ready(None);
        }
        if this.deadline.as_mut().poll(cx).is_ready() {
            this.expired = true;
            warn!("Download exceeded its deadline, aborting");
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "download deadline exceeded",
            ))));
        }
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_plain_disposition() {
        assert_eq!(
            content_disposition("b.bin"),
            HeaderValue::from_static("attachment; filename=\"b.bin\"")
        );
        assert_eq!(
            content_disposition("my app.zip"),
            HeaderValue::from_static("attachment; filename=\"my app.zip\"")
        );
    }

    #[test]
    fn test_non_ascii_disposition_is_encoded() {
        assert_eq!(
            content_disposition("安装包.zip"),
            HeaderValue::from_static(
                "attachment; filename*=UTF-8''%E5%AE%89%E8%A3%85%E5%8C%85.zip"
            )
        );
        assert_eq!(
            content_disposition("a\"b.bin"),
            HeaderValue::from_static("attachment; filename*=UTF-8''a%22b.bin")
        );
    }

    #[tokio::test]
    async fn test_stream_passes_through_before_deadline() {
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]);
        let collected: Vec<_> = DeadlineStream::new(chunks, Duration::from_secs(60), None)
            .collect()
            .await;
        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|c| c.is_ok()));
    }

    #[tokio::test]
    async fn test_stream_errors_after_deadline() {
        let stalled = futures::stream::pending::<io::Result<Bytes>>();
        let mut stream = DeadlineStream::new(stalled, Duration::from_millis(10), None);
        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err().kind(), io::ErrorKind::TimedOut);
        assert!(stream.next().await.is_none());
    }

    fn package_at(dir: &Path, name: &str) -> PackageRef {
        PackageRef {
            version: "1.0.0".to_string(),
            precedence: semver::Version::new(1, 0, 0),
            relative_path: name.to_string(),
            path: dir.join(name),
        }
    }

    async fn attach(store: &Path, name: &str) -> DepotResult<Response> {
        package_attachment(&package_at(store, name), store, Duration::from_secs(5), None).await
    }

    #[tokio::test]
    async fn test_regular_file_served() {
        let store = tempfile::tempdir().unwrap();
        std::fs::write(store.path().join("a.bin"), b"package a").unwrap();

        let response = attach(store.path(), "a.bin").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "9");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_leaving_store_is_not_served() {
        let store = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"not a package").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), store.path().join("link.bin"))
            .unwrap();

        let result = attach(store.path(), "link.bin").await;
        assert!(matches!(result, Err(DepotError::NotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_within_store_is_served() {
        let store = tempfile::tempdir().unwrap();
        std::fs::create_dir(store.path().join("releases")).unwrap();
        std::fs::write(store.path().join("releases/app-1.0.0.zip"), b"zip").unwrap();
        std::os::unix::fs::symlink(
            store.path().join("releases/app-1.0.0.zip"),
            store.path().join("current.zip"),
        )
        .unwrap();

        let response = attach(store.path(), "current.zip").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"current.zip\""
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let store = tempfile::tempdir().unwrap();
        let result = attach(store.path(), "gone.bin").await;
        assert!(matches!(result, Err(DepotError::NotFound(_))));
    }
}
