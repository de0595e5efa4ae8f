//! Folder and file names for harvested output.

use percent_encoding::percent_decode_str;
use url::Url;

const MAX_FILENAME_CHARS: usize = 220;
const UNSAFE: &[char] = &[':', '/', '\\', '?', '%', '*', '|', '"', '<', '>'];

pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned: String = name.chars().map(replace_unsafe).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(replace_unsafe)
        .take(MAX_FILENAME_CHARS)
        .collect();
    if cleaned.trim().is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

fn replace_unsafe(c: char) -> char {
    if UNSAFE.contains(&c) || c.is_control() {
        '-'
    } else {
        c
    }
}

/// `NNNN-basename` for the candidate at 1-based position `ordinal`.
/// Falls back to `image-N` when the URL path has no basename.
pub fn task_filename(url: &str, ordinal: usize) -> String {
    let base = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(&s).decode_utf8_lossy().into_owned())
        .unwrap_or_else(|| format!("image-{}", ordinal));
    format!("{:04}-{}", ordinal, sanitize_filename(&base))
}

pub fn has_extension(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// File extension for a media content type, without the dot.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "image/tiff" => "tiff",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => return None,
    };
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_names() {
        assert_eq!(sanitize_folder_name("  dodge: charger/2026 "), "dodge- charger-2026");
        assert_eq!(sanitize_folder_name("   "), "unnamed");
        assert_eq!(sanitize_folder_name("volvo-ex90"), "volvo-ex90");
    }

    #[test]
    fn filename_is_capped() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_filename(&long).chars().count(), 220);
        assert_eq!(sanitize_filename("a?b*c.jpg"), "a-b-c.jpg");
    }

    #[test]
    fn ordinal_prefix() {
        assert_eq!(task_filename("https://x.com/img/hero.jpg?w=200", 3), "0003-hero.jpg");
        assert_eq!(task_filename("https://x.com/", 12), "0012-image-12");
        assert_eq!(task_filename("https://x.com/a/My%20Car.png", 1), "0001-My Car.png");
        assert_eq!(task_filename("https://x.com/a%+1b.jpg", 1), "0001-a-+1b.jpg");
        assert_eq!(task_filename("https://x.com/caf%C3%A9.jpg", 2), "0002-café.jpg");
    }

    #[test]
    fn same_basename_distinct_files() {
        let a = task_filename("https://x.com/a/photo.jpg", 1);
        let b = task_filename("https://x.com/b/photo.jpg", 2);
        assert_ne!(a, b);
        assert_eq!(a, "0001-photo.jpg");
        assert_eq!(b, "0002-photo.jpg");
    }

    #[test]
    fn extensions() {
        assert!(has_extension("0001-hero.jpg"));
        assert!(!has_extension("0001-render"));
        assert!(!has_extension("0001-v1.2.3-build"));
        assert_eq!(extension_for_content_type("image/jpeg; charset=binary"), Some("jpg"));
        assert_eq!(extension_for_content_type("text/html"), None);
    }
}
