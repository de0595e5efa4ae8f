//! Classification of passively observed network traffic.

use url::Url;

pub const MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".ico", ".avif", ".mp4", ".webm",
];

/// A completed response is media if its content type says so, or if the URL
/// path carries a known media extension.
pub fn is_media_response(url: &str, content_type: &str) -> bool {
    if !is_http(url) {
        return false;
    }
    let ct = content_type.trim().to_ascii_lowercase();
    if ct.starts_with("image/") || ct.starts_with("video/") {
        return true;
    }
    has_media_extension(url)
}

/// Outgoing requests count only when the renderer typed them as images.
pub fn is_image_request(url: &str, typed_as_image: bool) -> bool {
    typed_as_image && is_http(url)
}

pub fn has_media_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_ascii_lowercase(),
        Err(_) => return false,
    };
    MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
