//! HTTP presentation layer.
//!
//! A single fallback handler routes by path shape instead of a static route
//! table, mirroring the catalog's hierarchy:
//!
//!   /driver/category/name...   one image: JSON record or raw bytes
//!   /, /driver, /driver/cat    listing: JSON array or HTML tree
//!
//! Clients pick the representation with the `Accept` header; anything that
//! does not ask for `application/json` gets the browser-facing form.

use crate::render;
use crate::tree::Tree;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::Router;
use imgsrv_db::{CatalogDb, Image, ImageFilter};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, info};

const QEMU_MIME: &str = "application/x-qemu-disk";

struct AppState {
    db: CatalogDb,
}

#[derive(Debug, Deserialize, Default)]
struct ListParams {
    #[serde(default)]
    group: String,
}

pub fn router(db: CatalogDb) -> Router {
    Router::new()
        .fallback(handle)
        .with_state(Arc::new(AppState { db }))
}

/// Serve until the cancellation token fires, then finish in-flight requests.
pub async fn serve(
    listener: TcpListener,
    db: CatalogDb,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "http listener ready");
    axum::serve(listener, router(db))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

async fn handle(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
    req: Request,
) -> Response {
    let segments = path_segments(req.uri());
    let json = wants_json(&req);

    if segments.len() >= 3 {
        let driver = segments[0].clone();
        let category = segments[1].clone();
        let name = segments[2..].join("/");
        image_response(&state.db, &driver, &category, &name, json, req).await
    } else {
        let driver = segments.first().cloned().unwrap_or_default();
        let category = segments.get(1).cloned().unwrap_or_default();
        let filter = ImageFilter::from_request(&driver, &category, &params.group);
        listing_response(&state.db, &filter, json).await
    }
}

async fn image_response(
    db: &CatalogDb,
    driver: &str,
    category: &str,
    name: &str,
    json: bool,
    req: Request,
) -> Response {
    let img = match db.find_one(driver, category, name).await {
        Ok(Some(img)) => img,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => return internal_error(err),
    };

    if json {
        return Json(img).into_response();
    }
    serve_data(&img, req).await
}

async fn listing_response(db: &CatalogDb, filter: &ImageFilter, json: bool) -> Response {
    let images = match db.find_many(filter).await {
        Ok(images) => images,
        Err(err) => return internal_error(err),
    };

    if json {
        return Json(images).into_response();
    }

    Html(render::index_page(&Tree::build(images))).into_response()
}

/// Stream the image file itself. `ServeFile` handles ranges and conditional
/// requests, which matter for multi-gigabyte disk images.
async fn serve_data(img: &Image, req: Request) -> Response {
    let mime: mime::Mime = QEMU_MIME
        .parse()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);

    match ServeFile::new_with_mime(&img.path, &mime).oneshot(req).await {
        Ok(res) => res.map(Body::new).into_response(),
        Err(err) => internal_error(err),
    }
}

fn path_segments(uri: &Uri) -> Vec<String> {
    uri.path()
        .split('/')
        .filter(|seg| !seg.is_empty())
        .map(str::to_string)
        .collect()
}

fn wants_json(req: &Request) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
