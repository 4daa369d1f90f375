use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use maestro_shared::{
    auth::{self, IdentityProvider},
    dashboard,
    document_store::DocumentStore,
    image_proxy::{self, ImageFetcher},
    products, responses,
    s3::{self, ObjectStore},
    AppState,
};
use std::sync::Arc;

/// Main Lambda handler - routes requests to the console endpoints
pub(crate) async fn function_handler<D, O, I, F>(
    event: Request,
    state: Arc<AppState<D, O, I, F>>,
) -> Result<Response<Body>, Error>
where
    D: DocumentStore,
    O: ObjectStore,
    I: IdentityProvider,
    F: ImageFetcher,
{
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    tracing::info!("API Lambda invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header(
                "Access-Control-Allow-Methods",
                "GET,POST,PATCH,DELETE,OPTIONS",
            )
            .header("Access-Control-Allow-Headers", "Content-Type,Authorization")
            .body(Body::Empty)
            .map_err(Box::new)?);
    }

    let query_param = |name: &str| {
        event
            .query_string_parameters_ref()
            .and_then(|params| params.first(name))
    };

    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match parts.as_slice() {
        // Image proxy (public - the browser loads product images through it)
        ["api", "proxy-image"] => match method {
            &Method::GET => {
                image_proxy::proxy_image(&state.fetcher, state.upstream_host(), query_param("url"))
                    .await
            }
            _ => responses::method_not_allowed(),
        },
        ["api", "auth", "login"] => match method {
            &Method::POST => auth::login(&state.identity, body).await,
            _ => responses::method_not_allowed(),
        },
        ["api", "dashboard"] => match method {
            &Method::GET => dashboard::get_dashboard(&state.documents).await,
            _ => responses::method_not_allowed(),
        },
        ["api", "products"] => match method {
            // GET /api/products?q= - list products, optionally filtered
            &Method::GET => {
                products::list_products(&state.documents, &state.resolver, query_param("q")).await
            }
            // POST /api/products - create product
            &Method::POST => {
                products::create_product(&state.documents, &state.resolver, body).await
            }
            // DELETE /api/products - clear the whole catalog
            &Method::DELETE => products::delete_all_products(&state.documents).await,
            _ => responses::method_not_allowed(),
        },
        ["api", "products", "colors"] => match method {
            &Method::GET => products::list_colors(),
            _ => responses::method_not_allowed(),
        },
        ["api", "products", product_id] => match method {
            &Method::GET => {
                products::get_product(&state.documents, &state.resolver, product_id).await
            }
            &Method::PATCH => {
                products::update_product(&state.documents, &state.resolver, product_id, body)
                    .await
            }
            &Method::DELETE => products::delete_product(&state.documents, product_id).await,
            _ => responses::method_not_allowed(),
        },
        ["api", "uploads"] => match method {
            &Method::POST => s3::upload_image(&state.objects, &state.resolver, body).await,
            _ => responses::method_not_allowed(),
        },
        _ => {
            tracing::warn!("No route matched - Method: {} Path: {}", method, path);
            responses::not_found("Not found")
        }
    }
}
