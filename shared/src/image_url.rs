/// Same-origin path served by the image proxy
pub const PROXY_IMAGE_PATH: &str = "/api/proxy-image";

/// Rewrites stored object-store image URLs into proxied same-origin URLs.
///
/// Only references that contain the upstream host marker are rewritten.
/// Everything else (empty strings, local assets, already proxied paths)
/// passes through untouched. No validation happens here; the proxy endpoint
/// checks the target when it is requested.
///
/// Apply this once per stored reference. A proxied path is a fixed point, but
/// an upstream URL rewritten twice would be encoded twice.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    upstream_host: String,
}

impl ImageResolver {
    pub fn new(upstream_host: impl Into<String>) -> Self {
        Self {
            upstream_host: upstream_host.into(),
        }
    }

    pub fn upstream_host(&self) -> &str {
        &self.upstream_host
    }

    pub fn resolve(&self, reference: &str) -> String {
        if reference.is_empty() || !reference.contains(self.upstream_host.as_str()) {
            return reference.to_string();
        }
        // Percent-encoding leaves the dots of the host intact, so a proxied
        // path still contains the marker
        if is_proxied(reference) {
            return reference.to_string();
        }

        format!(
            "{}?url={}",
            PROXY_IMAGE_PATH,
            urlencoding::encode(reference)
        )
    }

    pub fn resolve_all<'a, I>(&self, references: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        references.into_iter().map(|r| self.resolve(r)).collect()
    }
}

fn is_proxied(reference: &str) -> bool {
    reference
        .strip_prefix(PROXY_IMAGE_PATH)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('?'))
}

impl Default for ImageResolver {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_UPSTREAM_HOST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPSTREAM: &str = "https://firebasestorage.googleapis.com/v0/b/doors.appspot.com/o/products%2Fsofa.jpg?alt=media&token=abc";

    #[test]
    fn test_empty_reference_is_unchanged() {
        assert_eq!(ImageResolver::default().resolve(""), "");
    }

    #[test]
    fn test_unrelated_urls_pass_through() {
        let resolver = ImageResolver::default();
        assert_eq!(resolver.resolve("/placeholder.svg"), "/placeholder.svg");
        assert_eq!(
            resolver.resolve("https://cdn.example.com/chair.png"),
            "https://cdn.example.com/chair.png"
        );
    }

    #[test]
    fn test_upstream_url_is_proxied() {
        let resolved = ImageResolver::default().resolve(UPSTREAM);

        assert!(resolved.starts_with("/api/proxy-image?url=https%3A%2F%2Ffirebasestorage.googleapis.com"));
        // The whole reference is a single query value
        assert!(!resolved.contains('&'));
        assert!(resolved.contains("products%252Fsofa.jpg"));

        let encoded = resolved.strip_prefix("/api/proxy-image?url=").unwrap();
        assert_eq!(urlencoding::decode(encoded).unwrap(), UPSTREAM);
    }

    #[test]
    fn test_proxied_path_is_fixed_point() {
        let resolver = ImageResolver::default();
        let proxied = resolver.resolve(UPSTREAM);

        assert_eq!(resolver.resolve(&proxied), proxied);
    }

    #[test]
    fn test_custom_marker() {
        let resolver = ImageResolver::new("maestro-catalog.s3.amazonaws.com");
        let url = "https://maestro-catalog.s3.amazonaws.com/products/1.png";

        assert_eq!(
            resolver.resolve(url),
            "/api/proxy-image?url=https%3A%2F%2Fmaestro-catalog.s3.amazonaws.com%2Fproducts%2F1.png"
        );
        assert_eq!(resolver.resolve(UPSTREAM), UPSTREAM);
    }
}
