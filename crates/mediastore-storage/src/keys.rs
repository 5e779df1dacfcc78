//! Storage key naming and validation.
//!
//! Key format: `{namespace}/{owner_id}/{file name}`, where the namespace is chosen by the
//! file category (`profiles/{owner}/avatar`, `posts/{owner}`, ...). Unknown categories land
//! in `uploads/{owner}`. Key generation is centralized here so all backends stay consistent.

use std::convert::Infallible;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::{StorageError, StorageResult};

/// Logical category of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    ProfilePicture,
    CoverPicture,
    PostMedia,
    StoryMedia,
    GroupMedia,
    EventMedia,
    MessageMedia,
    Upload,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::ProfilePicture => "profile_pic",
            FileCategory::CoverPicture => "cover_pic",
            FileCategory::PostMedia => "post_media",
            FileCategory::StoryMedia => "story_media",
            FileCategory::GroupMedia => "group_media",
            FileCategory::EventMedia => "event_media",
            FileCategory::MessageMedia => "message_media",
            FileCategory::Upload => "upload",
        }
    }

    fn namespace(&self, owner_id: &str) -> String {
        match self {
            FileCategory::ProfilePicture => format!("profiles/{}/avatar", owner_id),
            FileCategory::CoverPicture => format!("profiles/{}/cover", owner_id),
            FileCategory::PostMedia => format!("posts/{}", owner_id),
            FileCategory::StoryMedia => format!("stories/{}", owner_id),
            FileCategory::GroupMedia => format!("groups/{}", owner_id),
            FileCategory::EventMedia => format!("events/{}", owner_id),
            FileCategory::MessageMedia => format!("messages/{}", owner_id),
            FileCategory::Upload => format!("uploads/{}", owner_id),
        }
    }
}

impl FromStr for FileCategory {
    type Err = Infallible;

    /// Unrecognized categories fall back to [`FileCategory::Upload`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "profile_pic" => FileCategory::ProfilePicture,
            "cover_pic" => FileCategory::CoverPicture,
            "post_media" => FileCategory::PostMedia,
            "story_media" => FileCategory::StoryMedia,
            "group_media" => FileCategory::GroupMedia,
            "event_media" => FileCategory::EventMedia,
            "message_media" => FileCategory::MessageMedia,
            _ => FileCategory::Upload,
        })
    }
}

impl Display for FileCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Last `/`- or `\`-separated segment of `value`, unless it is empty or a traversal segment.
fn base_segment(value: &str) -> Option<&str> {
    let base = value.rsplit(['/', '\\']).next().unwrap_or(value).trim();
    match base {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

/// Reduce a caller-supplied file name to its base name.
///
/// Both `/` and `\` count as separators, so no traversal segment survives.
pub fn sanitize_file_name(file_name: &str) -> &str {
    base_segment(file_name).unwrap_or("file")
}

/// Generate the storage key for an owner's file in the given category.
///
/// The owner ID occupies exactly one segment: it is reduced the same way as the file name,
/// and an owner with nothing usable left becomes `anonymous`.
pub fn storage_key(owner_id: &str, category: FileCategory, file_name: &str) -> String {
    format!(
        "{}/{}",
        category.namespace(base_segment(owner_id).unwrap_or("anonymous")),
        sanitize_file_name(file_name)
    )
}

/// Reject keys that are empty, absolute, or contain traversal or empty segments.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason: &str| {
        Err(StorageError::invalid_input(format!("invalid storage key: {reason}")).with_key(key))
    };

    if key.is_empty() {
        return invalid("key is empty");
    }
    if key.starts_with('/') {
        return invalid("key must not start with '/'");
    }
    if key.contains('\\') || key.contains('\0') {
        return invalid("key contains a forbidden character");
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return invalid("key contains an empty or relative segment");
    }
    Ok(())
}

/// Percent-encode each key segment for use in a URL path, keeping the `/` separators.
pub(crate) fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a configured domain or base URL: add `https://` when no scheme is given and
/// drop trailing slashes.
pub(crate) fn url_base(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageErrorKind;

    #[test]
    fn categories_map_to_namespaces() {
        let cases = [
            (FileCategory::ProfilePicture, "profiles/u1/avatar/me.png"),
            (FileCategory::CoverPicture, "profiles/u1/cover/me.png"),
            (FileCategory::PostMedia, "posts/u1/me.png"),
            (FileCategory::StoryMedia, "stories/u1/me.png"),
            (FileCategory::GroupMedia, "groups/u1/me.png"),
            (FileCategory::EventMedia, "events/u1/me.png"),
            (FileCategory::MessageMedia, "messages/u1/me.png"),
            (FileCategory::Upload, "uploads/u1/me.png"),
        ];
        for (category, expected) in cases {
            assert_eq!(storage_key("u1", category, "me.png"), expected);
        }
    }

    #[test]
    fn unknown_category_falls_back_to_uploads() {
        let category: FileCategory = "banner".parse().unwrap();
        assert_eq!(category, FileCategory::Upload);
        assert_eq!(storage_key("u9", category, "x.bin"), "uploads/u9/x.bin");

        let parsed: FileCategory = "Post_Media".parse().unwrap();
        assert_eq!(parsed, FileCategory::PostMedia);
        assert_eq!(parsed.to_string().parse::<FileCategory>().unwrap(), parsed);
    }

    #[test]
    fn file_names_are_reduced_to_base_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_file_name("dir/"), "file");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(
            storage_key("u1", FileCategory::PostMedia, "../../a.jpg"),
            "posts/u1/a.jpg"
        );
    }

    #[test]
    fn owner_ids_are_reduced_to_one_segment() {
        assert_eq!(storage_key("a/../b", FileCategory::PostMedia, "x.jpg"), "posts/b/x.jpg");
        assert_eq!(storage_key("", FileCategory::StoryMedia, "x.mp4"), "stories/anonymous/x.mp4");
        assert_eq!(
            storage_key("..", FileCategory::ProfilePicture, "me.png"),
            "profiles/anonymous/avatar/me.png"
        );
        for owner in ["", "/", "..", "a/../b", "u1\\..\\u2", " "] {
            let key = storage_key(owner, FileCategory::Upload, "f.bin");
            assert!(validate_key(&key).is_ok(), "{owner:?} -> {key}");
        }
    }

    #[test]
    fn key_generation_is_deterministic() {
        let a = storage_key("u1", FileCategory::StoryMedia, "s.mp4");
        let b = storage_key("u1", FileCategory::StoryMedia, "s.mp4");
        assert_eq!(a, b);
    }

    #[test]
    fn validate_key_rejects_malformed_keys() {
        for key in ["", "/etc/passwd", "a/../b", "a//b", "./a", "a\\b", "a/b/"] {
            let err = validate_key(key).unwrap_err();
            assert_eq!(err.kind(), StorageErrorKind::InvalidInput, "{key:?}");
        }
        assert!(validate_key("posts/u1/a.jpg").is_ok());
        assert!(validate_key("a..b/c").is_ok());
    }

    #[test]
    fn url_encoding_keeps_separators() {
        assert_eq!(encode_key_path("posts/u1/a.jpg"), "posts/u1/a.jpg");
        assert_eq!(encode_key_path("posts/u 1/my photo#1.jpg"), "posts/u%201/my%20photo%231.jpg");
    }

    #[test]
    fn url_base_adds_scheme() {
        assert_eq!(url_base("cdn.example.com/"), "https://cdn.example.com");
        assert_eq!(url_base("http://localhost:9000"), "http://localhost:9000");
    }
}
