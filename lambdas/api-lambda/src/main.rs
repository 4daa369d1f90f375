use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{run, service_fn, tracing, Error, Request};
use maestro_shared::auth::CognitoIdentity;
use maestro_shared::config::Config;
use maestro_shared::dynamo::DynamoDocumentStore;
use maestro_shared::image_proxy::HttpImageFetcher;
use maestro_shared::image_url::ImageResolver;
use maestro_shared::s3::S3ObjectStore;
use maestro_shared::AppState;
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config = Config::from_env()?;

    // Initialize clients once at startup
    let aws_config = aws_config::load_from_env().await;
    let fetcher = HttpImageFetcher::new(&config.proxy)?;

    let state = AppState::new(
        DynamoDocumentStore::new(DynamoClient::new(&aws_config), config.table_name.clone()),
        S3ObjectStore::new(
            S3Client::new(&aws_config),
            config.bucket_name.clone(),
            config.public_base_url.clone(),
        ),
        CognitoIdentity::new(
            CognitoClient::new(&aws_config),
            config.cognito_client_id.clone(),
            config.cognito_client_secret.clone(),
        ),
        fetcher,
        ImageResolver::new(config.proxy.upstream_host.clone()),
    );

    tracing::info!(
        "Maestro admin API ready (table {}, bucket {}, upstream {})",
        config.table_name,
        config.bucket_name,
        config.proxy.upstream_host
    );

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
