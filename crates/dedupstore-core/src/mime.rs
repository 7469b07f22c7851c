//! MIME type detection for stored content.

use crate::defaults::FALLBACK_MIME_TYPE;

/// Detect the content type of a file.
///
/// Resolution order:
/// 1. a declared type from the source, unless empty or the generic fallback
/// 2. magic bytes in `head` (via `infer`)
/// 3. the extension of `filename` (via `mime_guess`)
/// 4. `application/octet-stream`
pub fn detect_content_type(declared: Option<&str>, head: &[u8], filename: Option<&str>) -> String {
    if let Some(declared) = declared.map(str::trim) {
        if !declared.is_empty() && declared != FALLBACK_MIME_TYPE {
            return declared.to_string();
        }
    }

    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }

    if let Some(mime) = filename.and_then(|name| mime_guess::from_path(name).first()) {
        return mime.essence_str().to_string();
    }

    FALLBACK_MIME_TYPE.to_string()
}

/// Lowercased extension of a filename, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_declared_type_wins() {
        assert_eq!(
            detect_content_type(Some("text/csv"), PNG_HEADER, Some("a.png")),
            "text/csv"
        );
    }

    #[test]
    fn test_generic_declared_type_falls_through_to_magic() {
        assert_eq!(
            detect_content_type(Some("application/octet-stream"), PNG_HEADER, None),
            "image/png"
        );
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(
            detect_content_type(None, b"plain words", Some("notes.txt")),
            "text/plain"
        );
    }

    #[test]
    fn test_unknown_falls_back_to_octet_stream() {
        assert_eq!(
            detect_content_type(None, b"\x00\x01", Some("blob")),
            "application/octet-stream"
        );
        assert_eq!(detect_content_type(Some("  "), b"", None), FALLBACK_MIME_TYPE);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("dir.d/README"), None);
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("trailing."), None);
    }
}
