// Shared helpers for service tests: in-process HTTP stubs and fixtures

use crate::models::EncodedImage;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Serve `router` on an ephemeral local port and return its base URL.
pub(crate) async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A base URL nothing listens on.
pub(crate) async fn closed_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Adapters never decode the payload, so a JPEG header is enough.
pub(crate) fn sample_image() -> EncodedImage {
    EncodedImage {
        base64: BASE64.encode([0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46]),
        width: 1,
        height: 1,
    }
}

/// Write a small decodable PNG into `dir`.
pub(crate) fn write_sample_png(dir: &Path, name: &str) -> PathBuf {
    let img = RgbImage::from_fn(12, 9, |x, y| Rgb([(x * 20) as u8, (y * 25) as u8, 90]));
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}
