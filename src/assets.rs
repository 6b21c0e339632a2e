//! Stylesheet and default images, compiled into the binary.

use std::path::Path;

use actix_web::{http::header, web, HttpResponse};
use rust_embed::RustEmbed;

use crate::error::ApiError;

#[derive(RustEmbed)]
#[folder = "static/"]
struct Assets;

fn content_type(path: &str) -> mime::Mime {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("css") => mime::TEXT_CSS_UTF_8,
        Some("svg") => mime::IMAGE_SVG,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

/// GET /static/{path}
pub async fn serve(path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let path = path.into_inner();
    let file = Assets::get(&path).ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok()
        .content_type(content_type(&path))
        .insert_header((header::CACHE_CONTROL, "public, max-age=86400"))
        .body(file.data.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_images_are_embedded() {
        for url in [crate::models::DEFAULT_IMAGE_URL, crate::models::DEFAULT_HEADER_IMAGE_URL] {
            let path = url.trim_start_matches("/static/");
            assert!(Assets::get(path).is_some(), "{path} missing");
            assert_eq!(content_type(path), mime::IMAGE_SVG);
        }
        assert_eq!(content_type("stylesheets/style.css"), mime::TEXT_CSS_UTF_8);
    }
}
