use reqwest::Method;

use crate::config::{API_CACHE, IMAGES_CACHE, RUNTIME_CACHE, STATIC_CACHE};

/// Image file extensions served cache-first from the `images` cache
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "bmp", "avif",
];

/// Script/style/font extensions served cache-first from the `static` cache
const STATIC_EXTENSIONS: &[&str] = &["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot"];

/// Content class of a read request. Each class maps to exactly one named
/// cache; the cache's policy decides the fetch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Static,
    Image,
    Api,
    Document,
    Other,
}

impl RequestClass {
    /// The named cache backing this class.
    pub fn cache_name(&self) -> &'static str {
        match self {
            RequestClass::Api => API_CACHE,
            RequestClass::Image => IMAGES_CACHE,
            RequestClass::Static => STATIC_CACHE,
            RequestClass::Document | RequestClass::Other => RUNTIME_CACHE,
        }
    }
}

/// The request's declared destination, when the caller knows it (the
/// equivalent of content negotiation the origin would have performed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Image,
    Script,
    Style,
    Font,
}

/// An outgoing read request as seen by the router.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub method: Method,
    pub url: String,
    pub destination: Option<Destination>,
    /// Raw `Accept` header value, if any
    pub accept: Option<String>,
}

impl ReadRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            destination: None,
            accept: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// URL path component. Relative URLs fail `Url::parse`, so fall back to
    /// the raw string with any query or fragment stripped.
    fn path(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(url) => url.path().to_string(),
            Err(_) => {
                let raw = self.url.as_str();
                let end = raw.find(['?', '#']).unwrap_or(raw.len());
                raw[..end].to_string()
            }
        }
    }

    fn extension(&self) -> Option<String> {
        let path = self.path();
        let file = path.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_ascii_lowercase())
        }
    }
}

/// Classify a request, in order: API path prefix, file extension, declared
/// destination / content negotiation, then `Other`.
pub fn classify(request: &ReadRequest) -> RequestClass {
    let path = request.path();
    if path == "/api" || path.starts_with("/api/") {
        return RequestClass::Api;
    }

    if let Some(ext) = request.extension() {
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return RequestClass::Image;
        }
        if STATIC_EXTENSIONS.contains(&ext.as_str()) {
            return RequestClass::Static;
        }
    }

    match request.destination {
        Some(Destination::Document) => return RequestClass::Document,
        Some(Destination::Image) => return RequestClass::Image,
        Some(Destination::Script) | Some(Destination::Style) | Some(Destination::Font) => {
            return RequestClass::Static
        }
        None => {}
    }
    if let Some(accept) = &request.accept {
        if accept.contains("text/html") {
            return RequestClass::Document;
        }
    }

    RequestClass::Other
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn class_of(url: &str) -> RequestClass {
        classify(&ReadRequest::get(url))
    }

    #[test]
    fn test_api_prefix_wins() {
        assert_eq!(class_of("https://g.example.com/api/vehicles"), RequestClass::Api);
        assert_eq!(class_of("https://g.example.com/api"), RequestClass::Api);
        // Extension does not override the prefix rule
        assert_eq!(class_of("https://g.example.com/api/export.css"), RequestClass::Api);
    }

    #[test]
    fn test_api_prefix_must_be_a_path_segment() {
        assert_eq!(class_of("https://g.example.com/apiary"), RequestClass::Other);
    }

    #[test]
    fn test_image_extensions() {
        assert_eq!(class_of("https://g.example.com/photos/v42.jpg"), RequestClass::Image);
        assert_eq!(class_of("https://g.example.com/icons/wrench.SVG"), RequestClass::Image);
        assert_eq!(class_of("https://g.example.com/photo.webp?w=200"), RequestClass::Image);
    }

    #[test]
    fn test_static_extensions() {
        assert_eq!(class_of("https://g.example.com/assets/app.js"), RequestClass::Static);
        assert_eq!(class_of("https://g.example.com/styles/main.css"), RequestClass::Static);
        assert_eq!(class_of("https://g.example.com/fonts/inter.woff2"), RequestClass::Static);
    }

    #[test]
    fn test_relative_urls_classify_by_path() {
        assert_eq!(class_of("/photos/v42.jpg?w=200"), RequestClass::Image);
        assert_eq!(class_of("/assets/app.js#main"), RequestClass::Static);
        assert_eq!(class_of("/api/vehicles?active=1"), RequestClass::Api);
    }

    #[test]
    fn test_destination_document() {
        let request = ReadRequest::get("https://g.example.com/garage")
            .with_destination(Destination::Document);
        assert_eq!(classify(&request), RequestClass::Document);
    }

    #[test]
    fn test_accept_header_html() {
        let request = ReadRequest::get("https://g.example.com/garage")
            .with_accept("text/html,application/xhtml+xml");
        assert_eq!(classify(&request), RequestClass::Document);
    }

    #[test]
    fn test_destination_image_without_extension() {
        let request = ReadRequest::get("https://g.example.com/photos/42")
            .with_destination(Destination::Image);
        assert_eq!(classify(&request), RequestClass::Image);
    }

    #[test]
    fn test_extensionless_defaults_to_other() {
        assert_eq!(class_of("https://g.example.com/manifest"), RequestClass::Other);
    }

    #[test]
    fn test_class_to_cache_mapping() {
        assert_eq!(RequestClass::Api.cache_name(), "api");
        assert_eq!(RequestClass::Image.cache_name(), "images");
        assert_eq!(RequestClass::Static.cache_name(), "static");
        assert_eq!(RequestClass::Document.cache_name(), "runtime");
        assert_eq!(RequestClass::Other.cache_name(), "runtime");
    }
}
