use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess a content type from a file name's extension.
pub fn simple_mime(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        _ => OCTET_STREAM,
    }
}
