use async_trait::async_trait;
use crate::image_url::ImageResolver;
use crate::responses;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use base64::Engine;
use image::ImageFormat;
use lambda_http::{http::StatusCode, Body, Error, Response};

const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024; // 5MB
const DEFAULT_NAMESPACE: &str = "products";

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("failed to upload object: {0}")]
    Upload(String),
}

/// URL-addressable binary storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `namespace` and return the public URL
    async fn upload(
        &self,
        namespace: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ObjectStoreError>;
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStore {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url: public_base_url.into(),
        }
    }
}

fn object_key(namespace: &str, file_name: &str) -> String {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "jpg".to_string());

    format!("{}/{}.{}", namespace, uuid::Uuid::new_v4(), extension)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        namespace: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ObjectStoreError> {
        let key = object_key(namespace, file_name);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("S3 put_object failed for {}: {}", key, e);
                ObjectStoreError::Upload(e.to_string())
            })?;

        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct UploadImageRequest {
    #[serde(default)]
    pub namespace: Option<String>,
    pub file_name: String,
    /// What the browser claimed; the stored type comes from the bytes
    #[serde(default)]
    pub content_type: Option<String>,
    pub file_data: String, // base64 encoded
}

#[derive(Debug, serde::Serialize)]
pub struct UploadImageResponse {
    pub url: String,
    pub display_url: String,
}

fn mime_type(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        ImageFormat::Avif => Some("image/avif"),
        ImageFormat::Ico => Some("image/x-icon"),
        _ => None,
    }
}

fn valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Give the file the extension of the detected format
fn normalized_file_name(file_name: &str, format: ImageFormat) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((_, ext))
            if format
                .extensions_str()
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext)) =>
        {
            return file_name.to_string();
        }
        Some((stem, _)) => stem,
        None => file_name,
    };
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    format!("{}.{}", stem, extension)
}

/// Handle `POST /api/uploads`: store a base64 encoded product image
pub async fn upload_image<O: ObjectStore>(
    store: &O,
    resolver: &ImageResolver,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let request: UploadImageRequest = match responses::parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let namespace = request
        .namespace
        .as_deref()
        .unwrap_or(DEFAULT_NAMESPACE);
    if !valid_namespace(namespace) {
        return responses::error(
            StatusCode::BAD_REQUEST,
            "InvalidRequest",
            "Namespace may only contain lowercase letters, digits, '-' and '_'",
        );
    }

    let bytes = match base64::engine::general_purpose::STANDARD.decode(&request.file_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            return responses::error(
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                format!("Failed to decode base64: {}", e),
            )
        }
    };

    if bytes.is_empty() {
        return responses::error(StatusCode::BAD_REQUEST, "InvalidRequest", "Empty file");
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return responses::error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "FileTooLarge",
            format!("Images are limited to {} bytes", MAX_UPLOAD_BYTES),
        );
    }

    let detected = image::guess_format(&bytes)
        .ok()
        .and_then(|format| mime_type(format).map(|mime| (format, mime)));
    let Some((format, content_type)) = detected else {
        tracing::warn!(
            "Rejected upload {} (declared {:?}): not a supported image",
            request.file_name,
            request.content_type
        );
        return responses::error(
            StatusCode::BAD_REQUEST,
            "UnsupportedMediaType",
            "File is not a supported image",
        );
    };

    let file_name = normalized_file_name(&request.file_name, format);
    tracing::info!(
        "Uploading {} ({} bytes, {}) to {}",
        file_name,
        bytes.len(),
        content_type,
        namespace
    );

    match store.upload(namespace, &file_name, content_type, bytes).await {
        Ok(url) => {
            let display_url = resolver.resolve(&url);
            responses::json(StatusCode::CREATED, &UploadImageResponse { url, display_url })
        }
        Err(e) => {
            tracing::error!("Upload failed: {}", e);
            responses::internal_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[derive(Default)]
    struct RecordingStore {
        uploads: Mutex<Vec<(String, String, String, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn upload(
            &self,
            namespace: &str,
            file_name: &str,
            content_type: &str,
            bytes: Vec<u8>,
        ) -> Result<String, ObjectStoreError> {
            if self.fail {
                return Err(ObjectStoreError::Upload("access denied".into()));
            }
            self.uploads.lock().unwrap().push((
                namespace.to_string(),
                file_name.to_string(),
                content_type.to_string(),
                bytes.len(),
            ));
            Ok(format!(
                "https://firebasestorage.googleapis.com/v0/b/maestro/o/{}%2F{}?alt=media",
                namespace, file_name
            ))
        }
    }

    fn request(file_name: &str, bytes: &[u8], namespace: Option<&str>) -> Vec<u8> {
        serde_json::json!({
            "namespace": namespace,
            "file_name": file_name,
            "content_type": "image/png",
            "file_data": base64::engine::general_purpose::STANDARD.encode(bytes),
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_upload_png() {
        let store = RecordingStore::default();
        let resolver = ImageResolver::default();

        let response = upload_image(&store, &resolver, &request("sofa.PNG", PNG_HEADER, None))
            .await
            .unwrap();

        assert_eq!(response.status(), 201);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["url"].as_str().unwrap().starts_with("https://firebasestorage"));
        assert!(body["display_url"]
            .as_str()
            .unwrap()
            .starts_with("/api/proxy-image?url="));

        let uploads = store.uploads.lock().unwrap();
        assert_eq!(
            uploads[0],
            (
                "products".to_string(),
                "sofa.PNG".to_string(),
                "image/png".to_string(),
                PNG_HEADER.len()
            )
        );
    }

    #[tokio::test]
    async fn test_extension_follows_content() {
        let store = RecordingStore::default();

        upload_image(
            &store,
            &ImageResolver::default(),
            &request("photo.jpg", PNG_HEADER, Some("gallery")),
        )
        .await
        .unwrap();

        let uploads = store.uploads.lock().unwrap();
        assert_eq!(uploads[0].0, "gallery");
        assert_eq!(uploads[0].1, "photo.png");
    }

    #[tokio::test]
    async fn test_rejects_non_images() {
        let store = RecordingStore::default();

        let response = upload_image(
            &store,
            &ImageResolver::default(),
            &request("notes.png", b"just some text", None),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), 400);
        assert!(store.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_namespace_and_base64() {
        let store = RecordingStore::default();
        let resolver = ImageResolver::default();

        let response = upload_image(&store, &resolver, &request("a.png", PNG_HEADER, Some("../etc")))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let body = br#"{"file_name":"a.png","file_data":"***"}"#;
        let response = upload_image(&store, &resolver, body).await.unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_store_failure_is_500() {
        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };

        let response = upload_image(
            &store,
            &ImageResolver::default(),
            &request("a.png", PNG_HEADER, None),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), 500);
    }

    #[test]
    fn test_object_key_layout() {
        let key = object_key("products", "Sofa.JPEG");
        assert!(key.starts_with("products/"));
        assert!(key.ends_with(".jpeg"));

        assert!(object_key("products", "noext").ends_with(".jpg"));
    }
}
