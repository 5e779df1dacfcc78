//! Content-type policy helpers.
//!
//! Backends consult these when writing objects: public-readability drives the object ACL,
//! media detection drives the cache lifetime, and the extension table supplies a type for
//! objects stored without one.

/// Fallback MIME type for unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Cache-Control value applied to long-lived media objects (one year).
pub const MEDIA_CACHE_CONTROL: &str = "public, max-age=31536000";

const PUBLIC_TYPE_PREFIXES: &[&str] = &[
    "image/",
    "video/",
    "audio/",
    "text/css",
    "text/javascript",
    "application/javascript",
];

const MEDIA_TYPE_PREFIXES: &[&str] = &["image/", "video/", "audio/"];

fn has_prefix(content_type: &str, prefixes: &[&str]) -> bool {
    let normalized = content_type.trim().to_ascii_lowercase();
    prefixes.iter().any(|p| normalized.starts_with(p))
}

/// Whether objects of this type should be publicly readable.
pub fn is_public_content_type(content_type: &str) -> bool {
    has_prefix(content_type, PUBLIC_TYPE_PREFIXES)
}

/// Whether this type is image, video or audio media.
pub fn is_media_content_type(content_type: &str) -> bool {
    has_prefix(content_type, MEDIA_TYPE_PREFIXES)
}

/// Cache-Control header for the given type, if it deserves a long cache lifetime.
pub fn cache_control_for(content_type: &str) -> Option<&'static str> {
    is_media_content_type(content_type).then_some(MEDIA_CACHE_CONTROL)
}

/// Map a file extension (with or without the leading dot) to a MIME type.
pub fn content_type_from_extension(ext: &str) -> &'static str {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    match ext.as_str() {
        // Images
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" | "tif" => "image/tiff",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        // Videos
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        // Audio
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        // Documents
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "rtf" => "application/rtf",
        "csv" => "text/csv",
        // Archives
        "zip" => "application/zip",
        "rar" => "application/x-rar-compressed",
        "7z" => "application/x-7z-compressed",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// MIME type for a storage key, judged by the extension of its last segment.
pub fn content_type_for_key(key: &str) -> &'static str {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => content_type_from_extension(ext),
        _ => DEFAULT_CONTENT_TYPE,
    }
}
