/*!
 * Inbound media descriptors and file-name classification
 */

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Extensions that get player links
pub const STREAMABLE_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "3gp",
];

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "wav", "aac", "ogg", "wma"];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Lowercased extension of a file name, if any
fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether the name carries a streamable video extension (case-insensitive)
pub fn is_streamable(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| STREAMABLE_EXTENSIONS.contains(&ext.as_str()))
}

/// Coarse content class derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    Other,
}

impl MediaKind {
    pub fn from_file_name(file_name: &str) -> Self {
        match extension(file_name) {
            Some(ext) if STREAMABLE_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
            Some(ext) if AUDIO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Audio,
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Image,
            _ => MediaKind::Other,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
            MediaKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Name and size as announced by the sender
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaInfo {
    pub file_name: Option<String>,
    pub size: u64,
}

impl MediaInfo {
    pub fn new(file_name: Option<String>, size: u64) -> Self {
        Self { file_name, size }
    }
}

/// The kind of attachment a message carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMedia {
    Document(MediaInfo),
    Video(MediaInfo),
    Audio(MediaInfo),
    Photo(MediaInfo),
}

impl SourceMedia {
    /// Pick the variant matching a file name's extension
    pub fn classify(file_name: Option<String>, size: u64) -> Self {
        let kind = file_name
            .as_deref()
            .map(MediaKind::from_file_name)
            .unwrap_or(MediaKind::Other);
        let info = MediaInfo::new(file_name, size);
        match kind {
            MediaKind::Video => SourceMedia::Video(info),
            MediaKind::Audio => SourceMedia::Audio(info),
            MediaKind::Image => SourceMedia::Photo(info),
            MediaKind::Other => SourceMedia::Document(info),
        }
    }

    fn info(&self) -> &MediaInfo {
        match self {
            SourceMedia::Document(info)
            | SourceMedia::Video(info)
            | SourceMedia::Audio(info)
            | SourceMedia::Photo(info) => info,
        }
    }

    pub fn declared_size(&self) -> u64 {
        self.info().size
    }

    /// File name as sent, or a synthesized one for nameless media
    pub fn file_name(&self, message_id: &str) -> String {
        if let Some(name) = self.info().file_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        match self {
            SourceMedia::Video(_) => format!("video_{}.mp4", message_id),
            SourceMedia::Audio(_) => format!("audio_{}.mp3", message_id),
            SourceMedia::Photo(_) => format!("photo_{}.jpg", message_id),
            SourceMedia::Document(_) => format!("document_{}", message_id),
        }
    }
}

/// Where the bytes of an inbound file can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Path(PathBuf),
    Url(url::Url),
}

impl SourceLocator {
    /// Treat `http://` and `https://` as URLs, anything else as a local path
    pub fn parse(source: &str) -> Self {
        match url::Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => SourceLocator::Url(url),
            _ => SourceLocator::Path(PathBuf::from(source)),
        }
    }

    /// Last path component, used when the sender gave no name
    pub fn file_name_hint(&self) -> Option<String> {
        match self {
            SourceLocator::Path(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
            SourceLocator::Url(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned()),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Path(path) => write!(f, "{}", path.display()),
            SourceLocator::Url(url) => write!(f, "{}", url),
        }
    }
}

/// An inbound file, with its name resolved once at ingress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    pub message_id: String,
    pub media: SourceMedia,
    pub name: String,
    pub locator: SourceLocator,
}

impl IncomingFile {
    pub fn new(message_id: impl Into<String>, media: SourceMedia, locator: SourceLocator) -> Self {
        let message_id = message_id.into();
        let name = media.file_name(&message_id);
        Self {
            message_id,
            media,
            name,
            locator,
        }
    }

    pub fn declared_size(&self) -> u64 {
        self.media.declared_size()
    }
}

/// Object key for a file name: path separators and control characters
/// become `_`, surrounding whitespace is dropped.
pub fn object_key(file_name: &str) -> String {
    let cleaned: String = file_name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streamable_case_insensitive() {
        assert!(is_streamable("movie.MKV"));
        assert!(is_streamable("clip.mp4"));
        assert!(is_streamable("old.3gp"));
        assert!(!is_streamable("doc.pdf"));
        assert!(!is_streamable("song.mp3"));
        assert!(!is_streamable("mp4"));
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(MediaKind::from_file_name("a.WebM"), MediaKind::Video);
        assert_eq!(MediaKind::from_file_name("a.flac"), MediaKind::Audio);
        assert_eq!(MediaKind::from_file_name("a.jpeg"), MediaKind::Image);
        assert_eq!(MediaKind::from_file_name("a.tar.gz"), MediaKind::Other);
        assert_eq!(MediaKind::from_file_name("README"), MediaKind::Other);
    }

    #[test]
    fn test_default_names() {
        let id = "4711";
        assert_eq!(
            SourceMedia::Video(MediaInfo::new(None, 1)).file_name(id),
            "video_4711.mp4"
        );
        assert_eq!(
            SourceMedia::Audio(MediaInfo::new(None, 1)).file_name(id),
            "audio_4711.mp3"
        );
        assert_eq!(
            SourceMedia::Photo(MediaInfo::new(None, 1)).file_name(id),
            "photo_4711.jpg"
        );
        assert_eq!(
            SourceMedia::Document(MediaInfo::new(Some("  ".into()), 1)).file_name(id),
            "document_4711"
        );
        assert_eq!(
            SourceMedia::Video(MediaInfo::new(Some("trip.mov".into()), 1)).file_name(id),
            "trip.mov"
        );
    }

    #[test]
    fn test_classify() {
        let media = SourceMedia::classify(Some("song.ogg".into()), 42);
        assert!(matches!(media, SourceMedia::Audio(_)));
        assert_eq!(media.declared_size(), 42);
        assert!(matches!(SourceMedia::classify(None, 0), SourceMedia::Document(_)));
    }

    #[test]
    fn test_locator_parse() {
        assert!(matches!(
            SourceLocator::parse("https://cdn.example.com/a/b%20c.mp4"),
            SourceLocator::Url(_)
        ));
        assert!(matches!(
            SourceLocator::parse("/tmp/file.bin"),
            SourceLocator::Path(_)
        ));
        assert!(matches!(
            SourceLocator::parse("C:\\data\\file.bin"),
            SourceLocator::Path(_)
        ));
    }

    #[test]
    fn test_file_name_hint() {
        let url = SourceLocator::parse("https://cdn.example.com/a/b%20c.mp4?sig=1");
        assert_eq!(url.file_name_hint().as_deref(), Some("b c.mp4"));
        // plus is literal in a path
        let plus = SourceLocator::parse("https://cdn.example.com/a+b%2Bc.mp4");
        assert_eq!(plus.file_name_hint().as_deref(), Some("a+b+c.mp4"));
        let bare = SourceLocator::parse("https://cdn.example.com/");
        assert_eq!(bare.file_name_hint(), None);
        let path = SourceLocator::parse("/tmp/report.pdf");
        assert_eq!(path.file_name_hint().as_deref(), Some("report.pdf"));
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("movie.mkv"), "movie.mkv");
        assert_eq!(object_key("../etc/passwd"), ".._etc_passwd");
        assert_eq!(object_key("a\\b\nc"), "a_b_c");
        assert_eq!(object_key("  spaced name.mp4 "), "spaced name.mp4");
        assert_eq!(object_key(".."), "file");
        assert_eq!(object_key(""), "file");
    }

    #[test]
    fn test_incoming_file_resolves_name() {
        let file = IncomingFile::new(
            "99",
            SourceMedia::Photo(MediaInfo::new(None, 10)),
            SourceLocator::Path(PathBuf::from("/tmp/x")),
        );
        assert_eq!(file.name, "photo_99.jpg");
        assert_eq!(file.declared_size(), 10);
    }
}
