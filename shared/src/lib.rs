pub mod types;
pub mod config;
pub mod responses;
pub mod auth;
pub mod products;
pub mod dashboard;
pub mod document_store;
pub mod dynamo;
pub mod s3;
pub mod image_url;
pub mod image_proxy;

use auth::{CognitoIdentity, IdentityProvider};
use document_store::DocumentStore;
use dynamo::DynamoDocumentStore;
use image_proxy::{HttpImageFetcher, ImageFetcher};
use image_url::ImageResolver;
use s3::{ObjectStore, S3ObjectStore};
use std::sync::Arc;

/// Shared application state, built once per process.
///
/// Generic over its collaborators so the router can run against in-memory
/// fakes; the defaults are the AWS-backed implementations.
pub struct AppState<
    D = DynamoDocumentStore,
    O = S3ObjectStore,
    I = CognitoIdentity,
    F = HttpImageFetcher,
> {
    pub documents: D,
    pub objects: O,
    pub identity: I,
    pub fetcher: F,
    pub resolver: ImageResolver,
}

impl<D, O, I, F> AppState<D, O, I, F>
where
    D: DocumentStore,
    O: ObjectStore,
    I: IdentityProvider,
    F: ImageFetcher,
{
    pub fn new(
        documents: D,
        objects: O,
        identity: I,
        fetcher: F,
        resolver: ImageResolver,
    ) -> Arc<Self> {
        Arc::new(Self {
            documents,
            objects,
            identity,
            fetcher,
            resolver,
        })
    }

    /// The only host the image proxy may fetch from
    pub fn upstream_host(&self) -> &str {
        self.resolver.upstream_host()
    }
}
