//! Static file serving.
//!
//! Serves files from the watched root through an axum fallback. Directory
//! requests resolve to their `index.html`, and HTML pages get the reload
//! client script when injection is enabled.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use devreload::inject_script;

/// File served for directory requests.
const INDEX_FILE: &str = "index.html";

/// Where files come from and how HTML is rewritten.
struct StaticSite {
    root: PathBuf,
    inject_script: bool,
}

/// Create router that serves every path from `root`.
pub(crate) fn static_router(root: PathBuf, inject_script: bool) -> Router {
    let site = Arc::new(StaticSite {
        root,
        inject_script,
    });
    Router::new().fallback(serve_file).with_state(site)
}

async fn serve_file(State(site): State<Arc<StaticSite>>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Some(mut path) = resolve_path(&site.root, uri.path()) else {
        tracing::warn!(path = uri.path(), "Rejected path outside root");
        return StatusCode::NOT_FOUND.into_response();
    };

    if tokio::fs::metadata(&path)
        .await
        .is_ok_and(|meta| meta.is_dir())
    {
        path.push(INDEX_FILE);
    }

    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "Failed to read file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mime = mime_for(&path);
    let is_html = mime.essence_str() == mime_guess::mime::TEXT_HTML.essence_str();
    let body = if is_html && site.inject_script {
        match String::from_utf8(content) {
            Ok(html) => inject_script(&html).into_bytes(),
            Err(e) => e.into_bytes(),
        }
    } else {
        content
    };

    let content_type = if is_html {
        "text/html; charset=utf-8".to_owned()
    } else {
        mime.to_string()
    };
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Map a request path onto the filesystem below `root`.
///
/// Returns `None` for paths that would escape the root.
fn resolve_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for segment in request_path.split('/') {
        let segment = Path::new(segment);
        let mut components = segment.components();
        match (components.next(), components.next()) {
            (None, _) | (Some(Component::CurDir), None) => {}
            (Some(Component::Normal(name)), None) => resolved.push(name),
            _ => return None,
        }
    }
    Some(resolved)
}

/// Guess a MIME type from the file extension.
fn mime_for(path: &Path) -> mime_guess::Mime {
    mime_guess::from_path(path).first_or_octet_stream()
}
