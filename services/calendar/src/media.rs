//! Media classification from object-key file extensions.
//!
//! The bucket holds both browser-native formats and camera originals
//! (RAW/HEIC); the latter are recognized as media but are never served to the
//! web UI, so the displayable set is a strict subset of the recognized set.

/// Kind of a media object, derived from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Extensions classified as video.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "webm", "3gp", "mts", "m2ts", "wmv",
];

/// Extensions classified as image (browser-native plus camera originals).
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "bmp", "tif", "tiff", "heic", "heif", "dng",
    "cr2", "cr3", "nef", "arw", "orf", "rw2",
];

/// Extensions a browser can render natively. Subset of the recognized sets.
const WEB_DISPLAYABLE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "mp4", "webm", "mov",
];

/// Lowercase extension of the key's final path segment, if any.
pub fn extension(key: &str) -> Option<String> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Media kind for a key: video if the extension is a known video format,
/// image otherwise.
pub fn kind(key: &str) -> MediaKind {
    match extension(key) {
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
        _ => MediaKind::Image,
    }
}

/// Whether the key's extension belongs to any recognized media format.
pub fn is_recognized_media(key: &str) -> bool {
    match extension(key) {
        Some(ext) => {
            VIDEO_EXTENSIONS.contains(&ext.as_str()) || IMAGE_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Whether the key's extension is browser-native.
pub fn is_web_displayable(key: &str) -> bool {
    match extension(key) {
        Some(ext) => WEB_DISPLAYABLE_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_extraction() {
        assert_eq!(extension("processed/2024/IMG_0001.JPG"), Some("jpg".to_string()));
        assert_eq!(extension("clip.mp4"), Some("mp4".to_string()));
        assert_eq!(extension("no-extension"), None);
        assert_eq!(extension("dir.with.dots/plain"), None);
        assert_eq!(extension("trailing-dot."), None);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(kind("a/b/movie.MOV"), MediaKind::Video);
        assert_eq!(kind("a/b/photo.heic"), MediaKind::Image);
        // Unknown extensions default to image
        assert_eq!(kind("a/b/readme.txt"), MediaKind::Image);
    }

    #[test]
    fn test_raw_formats_recognized_but_not_displayable() {
        for key in ["shot.dng", "shot.cr2", "shot.heic"] {
            assert!(is_recognized_media(key), "{key} should be recognized");
            assert!(!is_web_displayable(key), "{key} should not be displayable");
        }
    }

    #[test]
    fn test_displayable_is_subset_of_recognized() {
        for ext in WEB_DISPLAYABLE_EXTENSIONS {
            let key = format!("x.{ext}");
            assert!(is_recognized_media(&key));
        }
    }
}
