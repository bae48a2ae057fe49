// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fetching a driver file from a URL into a temporary file.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use spoolwerk_core::error::{Result, SpoolwerkError};

/// First bytes of every PPD file.
const PPD_MAGIC: &[u8] = b"*PPD-Adobe";

/// Build the HTTP client used for driver downloads.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("spoolwerk/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SpoolwerkError::io_failure("build HTTP client", e))
}

/// Download the PPD at `url` into a temporary file.
///
/// `file://` URLs are read from local disk.  Any failure, including a
/// non-success HTTP status or a body that is not a PPD, is reported as
/// `DriverUnresolved` carrying the underlying detail.  The file is deleted
/// when the returned handle drops.
#[instrument(skip(client))]
pub async fn fetch_ppd(client: &reqwest::Client, url: &str) -> Result<NamedTempFile> {
    let unresolved = |detail: String| SpoolwerkError::DriverUnresolved(format!("{url}: {detail}"));

    let body: Vec<u8> = if let Some(local) = url.strip_prefix("file://") {
        tokio::fs::read(local)
            .await
            .map_err(|e| unresolved(e.to_string()))?
    } else {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| unresolved(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unresolved(format!("HTTP {status}")));
        }
        response
            .bytes()
            .await
            .map_err(|e| unresolved(e.to_string()))?
            .to_vec()
    };

    if !body.starts_with(PPD_MAGIC) {
        return Err(unresolved("response is not a PPD file".to_string()));
    }
    debug!(bytes = body.len(), "PPD downloaded");

    tokio::task::spawn_blocking(move || {
        let mut file = tempfile::Builder::new()
            .prefix("spoolwerk-download-")
            .suffix(".ppd")
            .tempfile()?;
        file.write_all(&body)?;
        file.flush()?;
        Ok::<_, std::io::Error>(file)
    })
    .await
    .map_err(|e| SpoolwerkError::io_failure("download task", e))?
    .map_err(|e| SpoolwerkError::io_failure("write downloaded PPD", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the URL to request.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.expect("write");
            stream.shutdown().await.ok();
        });
        format!("http://{addr}/drivers/acme.ppd")
    }

    fn client() -> reqwest::Client {
        http_client(Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn successful_download_lands_in_temp_file() {
        let url = serve_once("200 OK", "*PPD-Adobe: \"4.3\"\n*NickName: \"Acme\"\n").await;
        let file = fetch_ppd(&client(), &url).await.expect("fetch");
        let text = std::fs::read_to_string(file.path()).expect("read");
        assert!(text.contains("*NickName: \"Acme\""));
    }

    #[tokio::test]
    async fn http_error_is_driver_unresolved_with_status() {
        let url = serve_once("404 Not Found", "missing").await;
        let err = fetch_ppd(&client(), &url).await.expect_err("404");
        match err {
            SpoolwerkError::DriverUnresolved(detail) => assert!(detail.contains("404")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_ppd_body_is_rejected() {
        let url = serve_once("200 OK", "<html>login</html>").await;
        let err = fetch_ppd(&client(), &url).await.expect_err("html");
        assert!(matches!(err, SpoolwerkError::DriverUnresolved(_)));
    }

    #[tokio::test]
    async fn file_urls_are_read_locally() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("local.ppd");
        std::fs::write(&path, "*PPD-Adobe: \"4.3\"\n").expect("write");
        let url = format!("file://{}", path.display());
        let file = fetch_ppd(&client(), &url).await.expect("fetch");
        assert_ne!(file.path(), path.as_path());
    }
}
