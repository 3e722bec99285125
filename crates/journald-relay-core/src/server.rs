//! The plugin endpoint.
//!
//! The host speaks the log-driver plugin protocol: JSON requests over HTTP
//! on a Unix socket. Three driver endpoints plus the activation handshake
//! are served; everything else is a 404. Endpoint failures are returned in
//! the protocol's `Err` field, never as a dead connection.

use std::io;
use std::path::Path;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::UnixListener;
use tracing::{debug, error};

use crate::driver::LogDriver;
use crate::journal::ContainerInfo;

const ACTIVATE_PATH: &str = "/Plugin.Activate";
const START_LOGGING_PATH: &str = "/LogDriver.StartLogging";
const STOP_LOGGING_PATH: &str = "/LogDriver.StopLogging";
const CAPABILITIES_PATH: &str = "/LogDriver.Capabilities";

const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.1+json";

#[derive(Debug, Deserialize)]
struct StartLoggingRequest {
    #[serde(rename = "File")]
    file: String,
    #[serde(rename = "Info")]
    info: ContainerInfo,
}

#[derive(Debug, Deserialize)]
struct StopLoggingRequest {
    #[serde(rename = "File")]
    file: String,
}

#[derive(Debug, Serialize)]
struct ErrResponse {
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Debug, Serialize)]
struct CapabilitiesResponse {
    #[serde(rename = "Cap")]
    cap: Capability,
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Debug, Serialize)]
struct Capability {
    #[serde(rename = "ReadLogs")]
    read_logs: bool,
}

/// Binds the plugin's Unix socket, replacing a stale socket file from an
/// earlier run. Symlinks at the socket path are refused rather than
/// removed.
pub fn bind_plugin_socket(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.file_type().is_symlink() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("plugin socket path {} is a symlink", path.display()),
                ));
            }
            std::fs::remove_file(path)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    UnixListener::bind(path)
}

/// Serves plugin requests until the listener fails.
///
/// Each connection runs on its own task; a panicking handler is logged and
/// the accept loop keeps going.
pub async fn serve(driver: Arc<LogDriver>, listener: UnixListener) -> io::Result<()> {
    let server = hyper::server::conn::http1::Builder::new();
    let mut connections = tokio::task::JoinSet::new();

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                ) => continue,
                Err(e) => {
                    error!("PLUGIN_SERVER | accept failed: {e}");
                    return Err(e);
                }
            },
            finished = async {
                match connections.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("PLUGIN_SERVER | connection handler panicked: {e:?}");
                    }
                }
                continue;
            }
        };

        let driver = Arc::clone(&driver);
        let service = service_fn(move |req| {
            let driver = Arc::clone(&driver);
            async move { handle_request(driver, req).await }
        });

        let server = server.clone();
        connections.spawn(async move {
            if let Err(e) = server.serve_connection(TokioIo::new(stream), service).await {
                debug!("PLUGIN_SERVER | connection error: {e}");
            }
        });
    }
}

async fn handle_request(
    driver: Arc<LogDriver>,
    req: Request<Incoming>,
) -> http::Result<Response<Full<Bytes>>> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, ACTIVATE_PATH) => {
            json_response(StatusCode::OK, r#"{"Implements": ["LogDriver"]}"#.to_string())
        }
        (&Method::POST, START_LOGGING_PATH) => handle_start_logging(driver, req).await,
        (&Method::POST, STOP_LOGGING_PATH) => handle_stop_logging(driver, req).await,
        (&Method::POST, CAPABILITIES_PATH) => {
            let response = CapabilitiesResponse {
                cap: Capability { read_logs: false },
                err: String::new(),
            };
            json_response(StatusCode::OK, encode_body(&response))
        }
        _ => {
            let mut not_found = Response::new(Full::default());
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

async fn handle_start_logging(
    driver: Arc<LogDriver>,
    req: Request<Incoming>,
) -> http::Result<Response<Full<Bytes>>> {
    let request: StartLoggingRequest = match read_json_body(req).await {
        Ok(request) => request,
        Err(e) => return err_response(&format!("decoding request: {e}")),
    };

    debug!("PLUGIN_SERVER | StartLogging for {}", request.file);
    match driver.start_logging(&request.file, &request.info).await {
        Ok(()) => err_response(""),
        Err(e) => {
            error!("PLUGIN_SERVER | StartLogging failed: {e}");
            err_response(&e.to_string())
        }
    }
}

async fn handle_stop_logging(
    driver: Arc<LogDriver>,
    req: Request<Incoming>,
) -> http::Result<Response<Full<Bytes>>> {
    let request: StopLoggingRequest = match read_json_body(req).await {
        Ok(request) => request,
        Err(e) => return err_response(&format!("decoding request: {e}")),
    };

    debug!("PLUGIN_SERVER | StopLogging for {}", request.file);
    driver.stop_logging(&request.file).await;
    err_response("")
}

async fn read_json_body<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, String> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .to_bytes();
    serde_json::from_slice(&body).map_err(|e| e.to_string())
}

/// The protocol reports endpoint failure in-band: HTTP 200 with a non-empty
/// `Err` field.
fn err_response(message: &str) -> http::Result<Response<Full<Bytes>>> {
    let response = ErrResponse {
        err: message.to_string(),
    };
    json_response(StatusCode::OK, encode_body(&response))
}

fn encode_body<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| r#"{"Err": "encoding response"}"#.to_string())
}

fn json_response(status: StatusCode, body: String) -> http::Result<Response<Full<Bytes>>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
        .body(Full::from(Bytes::from(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::sink::testing::CapturingSink;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    async fn start_server() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("journald-relay.sock");
        let listener = bind_plugin_socket(&socket_path).expect("bind");
        let driver = Arc::new(LogDriver::with_sink(Arc::new(CapturingSink::default())));
        tokio::spawn(async move {
            let _ = serve(driver, listener).await;
        });
        (dir, socket_path)
    }

    async fn post(socket_path: &Path, endpoint: &str, body: &str) -> String {
        let mut stream = UnixStream::connect(socket_path).await.expect("connect");
        let request = format!(
            "POST {endpoint} HTTP/1.1\r\nHost: plugin\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    #[tokio::test]
    async fn test_activate_endpoint() {
        let (_dir, socket) = start_server().await;
        let response = post(&socket, ACTIVATE_PATH, "").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""Implements": ["LogDriver"]"#));
    }

    #[tokio::test]
    async fn test_capabilities_endpoint() {
        let (_dir, socket) = start_server().await;
        let response = post(&socket, CAPABILITIES_PATH, "{}").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""ReadLogs":false"#));
    }

    #[tokio::test]
    async fn test_start_logging_rejects_unknown_option() {
        let (_dir, socket) = start_server().await;
        let body = r#"{"File":"/no/such/fifo","Info":{"Config":{"bogus":"1"},"ContainerID":"abc"}}"#;
        let response = post(&socket, START_LOGGING_PATH, body).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("bogus"));
    }

    #[tokio::test]
    async fn test_start_logging_malformed_body() {
        let (_dir, socket) = start_server().await;
        let response = post(&socket, START_LOGGING_PATH, "{not json").await;
        assert!(response.contains("decoding request"));
    }

    #[tokio::test]
    async fn test_stop_logging_unknown_stream_succeeds() {
        let (_dir, socket) = start_server().await;
        let response = post(&socket, STOP_LOGGING_PATH, r#"{"File":"/never/started"}"#).await;
        assert!(response.contains(r#""Err":"""#));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_404() {
        let (_dir, socket) = start_server().await;
        let response = post(&socket, "/LogDriver.ReadLogs", "{}").await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_bind_refuses_symlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("target");
        std::fs::write(&target, b"data").expect("write target");
        let link = dir.path().join("plugin.sock");
        std::os::unix::fs::symlink(&target, &link).expect("symlink");

        let err = bind_plugin_socket(&link).expect_err("should refuse symlink");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        // The symlink target is untouched.
        assert_eq!(std::fs::read(&target).expect("read"), b"data");
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plugin.sock");
        std::fs::write(&path, b"stale").expect("write stale");

        let listener = bind_plugin_socket(&path).expect("bind over stale file");
        drop(listener);
    }
}
