//! Request handlers.
//!
//! A [`Handler`] receives every parsed request of every connection. It fills
//! the paired response in place, either before `dispatch` returns or later
//! from another thread after [`Message::freeze`]. [`FileHandler`] is the
//! stock handler serving files below a root directory.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use anyhow::Context;

use crate::http::body::Body;
use crate::http::headers::{ByteRange, ACCEPT_RANGES, CONTENT_RANGE};
use crate::http::message::Message;
use crate::http::request::Method;
use crate::http::response::{Response, StatusCode};

pub trait Handler: Send + Sync {
    /// Handles one request.
    ///
    /// An `Err` is answered with `500 Internal Server Error`; any freeze taken
    /// before failing is released by the connection.
    fn dispatch(&self, message: &Message, root: &Path) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Message, &Path) -> anyhow::Result<()> + Send + Sync,
{
    fn dispatch(&self, message: &Message, root: &Path) -> anyhow::Result<()> {
        self(message, root)
    }
}

/// Serves regular files under the root; a directory is served through its
/// `index.html`.
///
/// A request for exactly one byte range gets `206 Partial Content` (or `416`
/// when the range misses the file). Multi-range requests get the whole file.
///
/// File lookups run on the blocking pool when a tokio runtime is available,
/// otherwise inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileHandler;

impl Handler for FileHandler {
    fn dispatch(&self, message: &Message, root: &Path) -> anyhow::Result<()> {
        let request = message.request();

        if request.method == Method::POST {
            let mut response = message.response().context("response already sent")?;
            response.set_status_page(StatusCode::MethodNotAllowed);
            response.headers.insert("Allow", "GET, HEAD");
            return Ok(());
        }

        let Some(path) = resolve(root, request.path()) else {
            let mut response = message.response().context("response already sent")?;
            response.set_status_page(StatusCode::Forbidden);
            return Ok(());
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                message.freeze();
                let message = message.clone();
                runtime.spawn_blocking(move || {
                    serve_file(&message, &path);
                    message.thaw();
                });
            }
            Err(_) => serve_file(message, &path),
        }

        Ok(())
    }
}

/// Maps a request path onto the file system, refusing anything that would
/// leave `root`.
pub fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(request_path)?;
    let mut path = root.to_path_buf();

    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    Some(path)
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}

fn serve_file(message: &Message, path: &Path) {
    let outcome = open(path);
    let ranges = message.request().ranges();
    let Some(mut response) = message.response() else {
        return;
    };

    match outcome {
        Ok((file, length, target)) => {
            response.headers.insert(ACCEPT_RANGES, "bytes");
            let content_type = content_type(&target);

            match ranges {
                [range] => serve_range(&mut response, file, length, content_type, range),
                _ => {
                    tracing::debug!(seq = message.seq(), path = %target.display(), length, "Serving file");
                    response.set_body(Body::from_stream(content_type, length, file));
                }
            }
        }
        Err(e) => {
            let status = match e.kind() {
                io::ErrorKind::NotFound => StatusCode::NotFound,
                io::ErrorKind::PermissionDenied => StatusCode::Forbidden,
                _ => StatusCode::InternalServerError,
            };
            tracing::debug!(seq = message.seq(), path = %path.display(), error = %e, "File not served");
            response.set_status_page(status);
        }
    }
}

fn serve_range(
    response: &mut Response,
    mut file: File,
    length: u64,
    content_type: &str,
    range: &ByteRange,
) {
    let Some((first, last)) = range.resolve(length) else {
        tracing::debug!(?range, length, "Range not satisfiable");
        response.set_status_page(StatusCode::RangeNotSatisfiable);
        response.headers.insert(CONTENT_RANGE, format!("bytes */{length}"));
        return;
    };

    if let Err(e) = file.seek(SeekFrom::Start(first)) {
        tracing::debug!(error = %e, first, "Seek failed");
        response.set_status_page(StatusCode::InternalServerError);
        return;
    }

    let part = last - first + 1;
    tracing::debug!(first, last, length, "Serving file range");
    response.status = StatusCode::PartialContent;
    response
        .headers
        .insert(CONTENT_RANGE, format!("bytes {first}-{last}/{length}"));
    response.set_body(Body::from_stream(content_type, part, file.take(part)));
}

fn open(path: &Path) -> io::Result<(File, u64, PathBuf)> {
    let mut target = path.to_path_buf();
    if fs::metadata(&target)?.is_dir() {
        target.push("index.html");
    }

    let file = File::open(&target)?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(io::Error::new(io::ErrorKind::PermissionDenied, "not a regular file"));
    }

    Ok((file, metadata.len(), target))
}

/// Content type from the file extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
