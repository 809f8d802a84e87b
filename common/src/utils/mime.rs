use std::path::Path;

use mime_guess::from_path;

/// Extensions accepted by the upload surface.
pub const ALLOWED_UPLOAD_EXTENSIONS: [&str; 4] = ["pdf", "md", "txt", "sql"];

/// Maximum accepted upload size.
pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

pub fn is_allowed_upload_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .is_some_and(|ext| ALLOWED_UPLOAD_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type from the file extension. The listed mappings are fixed; anything
/// else falls through `mime_guess` and bottoms out at octet-stream.
pub fn content_type_for_path(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => "application/pdf".to_string(),
        "md" | "markdown" => "text/markdown".to_string(),
        "sql" => "text/sql".to_string(),
        "txt" | "py" => "text/plain".to_string(),
        _ => from_path(path)
            .first_or(mime::APPLICATION_OCTET_STREAM)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_map_covers_the_upload_set() {
        assert_eq!(
            content_type_for_path(Path::new("report.PDF")),
            "application/pdf"
        );
        assert_eq!(
            content_type_for_path(Path::new("notes.md")),
            "text/markdown"
        );
        assert_eq!(
            content_type_for_path(Path::new("dump.sql")),
            "text/sql"
        );
        assert_eq!(content_type_for_path(Path::new("plain.txt")), "text/plain");
    }

    #[test]
    fn unknown_extensions_become_octet_stream() {
        assert_eq!(
            content_type_for_path(Path::new("mystery.zzz")),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for_path(Path::new("no_extension")),
            "application/octet-stream"
        );
    }

    #[test]
    fn upload_extension_gate_is_case_insensitive() {
        assert!(is_allowed_upload_extension(Path::new("a.pdf")));
        assert!(is_allowed_upload_extension(Path::new("b.MD")));
        assert!(is_allowed_upload_extension(Path::new("c.Txt")));
        assert!(is_allowed_upload_extension(Path::new("d.sql")));
        assert!(!is_allowed_upload_extension(Path::new("e.docx")));
        assert!(!is_allowed_upload_extension(Path::new("f")));
    }
}
