//! Minimal `multipart/form-data` encoder for file uploads.

const BOUNDARY_LEN: usize = 32;

/// Builder for a `multipart/form-data` request body.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    /// Start a form with a random boundary.
    pub fn new() -> Self {
        let boundary: String = std::iter::repeat_with(fastrand::alphanumeric)
            .take(BOUNDARY_LEN)
            .collect();
        Self::with_boundary(boundary)
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Add a plain text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"",
            escape(name)
        ));
        self.body.extend_from_slice(b"\r\n");
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Add a file field.
    pub fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"",
            escape(name),
            escape(filename)
        ));
        self.body
            .extend_from_slice(format!("Content-Type: {}\r\n\r\n", strip_newlines(content_type)).as_bytes());
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Close the form and return the encoded body.
    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }

    fn open_part(&mut self, disposition: &str) {
        self.body
            .extend_from_slice(format!("--{}\r\n{}\r\n", self.boundary, disposition).as_bytes());
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(value: &str) -> String {
    strip_newlines(value).replace('"', "%22")
}

fn strip_newlines(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_text_and_file_parts() {
        let form = MultipartForm::with_boundary("XYZ")
            .text("payload_json", r#"{"content":"hi"}"#)
            .file("file", "report.txt", "text/plain", b"hello");

        assert_eq!(form.content_type(), "multipart/form-data; boundary=XYZ");

        let body = String::from_utf8(form.finish()).unwrap();
        let expected = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"payload_json\"\r\n\r\n\
            {\"content\":\"hi\"}\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"report.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            hello\r\n\
            --XYZ--\r\n";
        assert_eq!(body, expected);
    }

    #[test]
    fn random_boundaries_differ() {
        let a = MultipartForm::new();
        let b = MultipartForm::new();
        assert_eq!(a.boundary().len(), BOUNDARY_LEN);
        assert_ne!(a.boundary(), b.boundary());
    }

    #[test]
    fn filenames_cannot_break_headers() {
        let body = MultipartForm::with_boundary("B")
            .file("file", "evil\"\r\nX-Injected: 1.txt", "text/plain", b"")
            .finish();
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("filename=\"evil%22X-Injected: 1.txt\""));
        assert!(!body.contains("\r\nX-Injected"));
    }
}
