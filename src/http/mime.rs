//! File-extension to media-type map.

use std::collections::HashMap;

/// Extension → type table with a required default. Lookup is ASCII
/// case-insensitive on the extension.
pub struct MimeMap {
    map: HashMap<String, String>,
    default_type: String,
}

impl MimeMap {
    /// Creates a map preloaded with the stock types.
    pub fn new(default_type: &str) -> Self {
        let mut map = Self {
            map: HashMap::new(),
            default_type: default_type.to_owned(),
        };
        for (ext, ty) in [
            ("css", "text/css"),
            ("gif", "image/gif"),
            ("gz", "application/gzip"),
            ("htm", "text/html"),
            ("html", "text/html"),
            ("ico", "image/vnd.microsoft.icon"),
            ("jpeg", "image/jpeg"),
            ("jpg", "image/jpeg"),
            ("js", "application/javascript"),
            ("json", "application/json"),
            ("pdf", "application/pdf"),
            ("png", "image/png"),
            ("svg", "image/svg+xml"),
            ("txt", "text/plain"),
            ("xml", "application/xml"),
        ] {
            map.define(ext, ty);
        }
        map
    }

    /// Registers (or overrides) a type for an extension.
    pub fn define(&mut self, ext: &str, ty: &str) {
        self.map.insert(ext.to_ascii_lowercase(), ty.to_owned());
    }

    /// Looks up the type for an extension, falling back to the default.
    pub fn get(&self, ext: &[u8]) -> &str {
        std::str::from_utf8(ext)
            .ok()
            .and_then(|e| self.map.get(&e.to_ascii_lowercase()))
            .map_or(&self.default_type, String::as_str)
    }

    pub fn default_type(&self) -> &str {
        &self.default_type
    }
}

impl Default for MimeMap {
    fn default() -> Self {
        Self::new("application/octet-stream")
    }
}
