use crate::document_store::{Document, DocumentStore, Fields};
use crate::image_url::ImageResolver;
use crate::responses;
use crate::types::{
    CreateProductRequest, Product, ProductView, UpdateProductRequest, DEFAULT_COLORS, PRODUCTS,
};
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;
use serde_json::Value;

fn to_product(doc: Document) -> Result<Product, serde_json::Error> {
    serde_json::from_value(doc.into_value())
}

fn to_fields<T: Serialize>(value: &T) -> Result<Fields, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        _ => Ok(Fields::new()),
    }
}

fn view(product: Product, resolver: &ImageResolver) -> ProductView {
    ProductView {
        display_images: resolver.resolve_all(&product.images),
        product,
    }
}

fn invalid(message: &str) -> Result<Response<Body>, Error> {
    responses::error(StatusCode::BAD_REQUEST, "InvalidProduct", message)
}

/// List all products, newest first, optionally filtered by `query`
pub async fn list_products<D: DocumentStore>(
    store: &D,
    resolver: &ImageResolver,
    query: Option<&str>,
) -> Result<Response<Body>, Error> {
    let documents = match store.list(PRODUCTS).await {
        Ok(docs) => docs,
        Err(e) => {
            tracing::error!("Error fetching products: {}", e);
            return responses::internal_error();
        }
    };

    let mut products = Vec::with_capacity(documents.len());
    for doc in documents {
        let id = doc.id.clone();
        match to_product(doc) {
            Ok(product) => products.push(product),
            Err(e) => tracing::warn!("Skipping malformed product {}: {}", id, e),
        }
    }

    if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
        products.retain(|p| p.matches(query));
    }

    products.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let views: Vec<ProductView> = products.into_iter().map(|p| view(p, resolver)).collect();
    responses::json(StatusCode::OK, &views)
}

pub async fn get_product<D: DocumentStore>(
    store: &D,
    resolver: &ImageResolver,
    product_id: &str,
) -> Result<Response<Body>, Error> {
    match store.get(PRODUCTS, product_id).await {
        Ok(Some(doc)) => match to_product(doc) {
            Ok(product) => responses::json(StatusCode::OK, &view(product, resolver)),
            Err(e) => {
                tracing::error!("Product {} is malformed: {}", product_id, e);
                responses::internal_error()
            }
        },
        Ok(None) => responses::not_found("Product not found"),
        Err(e) => {
            tracing::error!("Error fetching product {}: {}", product_id, e);
            responses::internal_error()
        }
    }
}

pub async fn create_product<D: DocumentStore>(
    store: &D,
    resolver: &ImageResolver,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateProductRequest = match responses::parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let name = req.name.trim();
    if name.is_empty() {
        return invalid("Product name is required");
    }
    if !req.price.is_valid() {
        return invalid("Price range must satisfy 0 <= min <= max");
    }

    let now = chrono::Utc::now().to_rfc3339();
    let product = Product {
        id: String::new(),
        name: name.to_string(),
        category: req.category.trim().to_string(),
        price: req.price,
        description: req.description,
        colors: req.colors,
        images: req.images,
        in_stock: req.in_stock,
        featured: req.featured,
        created_at: now.clone(),
        updated_at: now,
    };

    let doc = match store.add(PRODUCTS, to_fields(&product)?).await {
        Ok(doc) => doc,
        Err(e) => {
            tracing::error!("Error creating product: {}", e);
            return responses::internal_error();
        }
    };

    tracing::info!("Created product {} ({})", doc.id, product.name);
    let product = Product { id: doc.id, ..product };
    responses::json(StatusCode::CREATED, &view(product, resolver))
}

pub async fn update_product<D: DocumentStore>(
    store: &D,
    resolver: &ImageResolver,
    product_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let mut req: UpdateProductRequest = match responses::parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    if let Some(name) = req.name.as_mut() {
        *name = name.trim().to_string();
        if name.is_empty() {
            return invalid("Product name is required");
        }
    }
    if req.price.is_some_and(|price| !price.is_valid()) {
        return invalid("Price range must satisfy 0 <= min <= max");
    }

    let mut fields = to_fields(&req)?;
    fields.insert(
        "updatedAt".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );

    match store.update(PRODUCTS, product_id, fields).await {
        Ok(Some(doc)) => match to_product(doc) {
            Ok(product) => {
                tracing::info!("Updated product {}", product_id);
                responses::json(StatusCode::OK, &view(product, resolver))
            }
            Err(e) => {
                tracing::error!("Product {} is malformed after update: {}", product_id, e);
                responses::internal_error()
            }
        },
        Ok(None) => responses::not_found("Product not found"),
        Err(e) => {
            tracing::error!("Error updating product {}: {}", product_id, e);
            responses::internal_error()
        }
    }
}

pub async fn delete_product<D: DocumentStore>(
    store: &D,
    product_id: &str,
) -> Result<Response<Body>, Error> {
    match store.delete(PRODUCTS, product_id).await {
        Ok(true) => {
            tracing::info!("Deleted product {}", product_id);
            Ok(Response::builder()
                .status(StatusCode::NO_CONTENT)
                .header("Access-Control-Allow-Origin", "*")
                .body(Body::Empty)
                .map_err(Box::new)?)
        }
        Ok(false) => responses::not_found("Product not found"),
        Err(e) => {
            tracing::error!("Error deleting product {}: {}", product_id, e);
            responses::internal_error()
        }
    }
}

/// Remove every product in the catalog
pub async fn delete_all_products<D: DocumentStore>(store: &D) -> Result<Response<Body>, Error> {
    let documents = match store.list(PRODUCTS).await {
        Ok(docs) => docs,
        Err(e) => {
            tracing::error!("Error listing products for bulk delete: {}", e);
            return responses::internal_error();
        }
    };

    let mut deleted = 0;
    for doc in &documents {
        match store.delete(PRODUCTS, &doc.id).await {
            Ok(true) => deleted += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    "Bulk delete stopped after {} of {} products: {}",
                    deleted,
                    documents.len(),
                    e
                );
                return responses::internal_error();
            }
        }
    }

    tracing::info!("Bulk deleted {} products", deleted);
    responses::json(StatusCode::OK, &serde_json::json!({ "deleted": deleted }))
}

pub fn list_colors() -> Result<Response<Body>, Error> {
    responses::json(StatusCode::OK, &DEFAULT_COLORS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::MemoryDocumentStore;
    use serde_json::json;

    const UPSTREAM_IMAGE: &str =
        "https://firebasestorage.googleapis.com/v0/b/maestro/o/products%2Fa.jpg?alt=media";

    fn json_body(response: &Response<Body>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    async fn create(store: &MemoryDocumentStore, payload: Value) -> Value {
        let response = create_product(
            store,
            &ImageResolver::default(),
            payload.to_string().as_bytes(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 201);
        json_body(&response)
    }

    #[tokio::test]
    async fn test_create_and_get_product() {
        let store = MemoryDocumentStore::new();
        let created = create(
            &store,
            json!({
                "name": "  Диван Честер ",
                "category": "Диваны",
                "price": {"min": 1500, "max": 2100},
                "colors": ["Коричневый"],
                "images": [UPSTREAM_IMAGE, "/placeholder.svg"]
            }),
        )
        .await;

        assert_eq!(created["name"], "Диван Честер");
        assert_eq!(created["inStock"], true);
        assert_eq!(created["createdAt"], created["updatedAt"]);
        assert_eq!(created["images"][0], UPSTREAM_IMAGE);
        assert!(created["displayImages"][0]
            .as_str()
            .unwrap()
            .starts_with("/api/proxy-image?url="));
        assert_eq!(created["displayImages"][1], "/placeholder.svg");

        let id = created["id"].as_str().unwrap();
        let response = get_product(&store, &ImageResolver::default(), id)
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(json_body(&response)["id"], id);

        // Stored references stay raw; only the view is proxied
        let stored = store.get(PRODUCTS, id).await.unwrap().unwrap();
        assert_eq!(stored.fields["images"][0], UPSTREAM_IMAGE);
        assert!(!stored.fields.contains_key("displayImages"));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let store = MemoryDocumentStore::new();
        let resolver = ImageResolver::default();

        for payload in [
            json!({"name": "   ", "price": {"min": 1, "max": 2}}),
            json!({"name": "Стол", "price": {"min": 5, "max": 2}}),
            json!({"name": "Стол"}),
        ] {
            let response = create_product(&store, &resolver, payload.to_string().as_bytes())
                .await
                .unwrap();
            assert_eq!(response.status(), 400, "{}", payload);
        }
        assert!(store.list(PRODUCTS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_by_name_or_category() {
        let store = MemoryDocumentStore::new();
        create(&store, json!({"name": "Шкаф", "category": "Спальня", "price": {"min": 1, "max": 1}})).await;
        create(&store, json!({"name": "Кровать", "category": "Спальня", "price": {"min": 1, "max": 1}})).await;
        create(&store, json!({"name": "Стул", "category": "Кухня", "price": {"min": 1, "max": 1}})).await;
        let resolver = ImageResolver::default();

        let all = list_products(&store, &resolver, None).await.unwrap();
        assert_eq!(json_body(&all).as_array().unwrap().len(), 3);

        let bedroom = list_products(&store, &resolver, Some("спальня")).await.unwrap();
        assert_eq!(json_body(&bedroom).as_array().unwrap().len(), 2);

        let chairs = list_products(&store, &resolver, Some("СТУЛ")).await.unwrap();
        let chairs = json_body(&chairs);
        assert_eq!(chairs.as_array().unwrap().len(), 1);
        assert_eq!(chairs[0]["name"], "Стул");

        let blank = list_products(&store, &resolver, Some("  ")).await.unwrap();
        assert_eq!(json_body(&blank).as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_skips_malformed_records() {
        let store = MemoryDocumentStore::new();
        create(&store, json!({"name": "Шкаф", "price": {"min": 1, "max": 1}})).await;
        let mut broken = Fields::new();
        broken.insert("name".into(), json!(42));
        store.add(PRODUCTS, broken).await.unwrap();

        let response = list_products(&store, &ImageResolver::default(), None)
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(json_body(&response).as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_product() {
        let store = MemoryDocumentStore::new();
        let resolver = ImageResolver::default();
        let created = create(
            &store,
            json!({"name": "Стол", "category": "Кухня", "price": {"min": 100, "max": 200}}),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let response = update_product(
            &store,
            &resolver,
            id,
            br#"{"featured": true, "price": {"min": 150, "max": 200}}"#,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 200);
        let updated = json_body(&response);
        assert_eq!(updated["featured"], true);
        assert_eq!(updated["price"]["min"], 150.0);
        assert_eq!(updated["name"], "Стол");
        assert_eq!(updated["createdAt"], created["createdAt"]);

        let bad = update_product(&store, &resolver, id, br#"{"price": {"min": 300, "max": 200}}"#)
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);

        let missing = update_product(&store, &resolver, "nope", br#"{"featured": false}"#)
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn test_delete_and_bulk_delete() {
        let store = MemoryDocumentStore::new();
        for name in ["a", "b", "c"] {
            create(&store, json!({"name": name, "price": {"min": 1, "max": 1}})).await;
        }
        let first = store.list(PRODUCTS).await.unwrap()[0].id.clone();

        assert_eq!(delete_product(&store, &first).await.unwrap().status(), 204);
        assert_eq!(delete_product(&store, &first).await.unwrap().status(), 404);

        let response = delete_all_products(&store).await.unwrap();
        assert_eq!(json_body(&response)["deleted"], 2);
        assert!(store.list(PRODUCTS).await.unwrap().is_empty());
    }

    #[test]
    fn test_colors() {
        let response = list_colors().unwrap();
        let colors = json_body(&response);
        assert_eq!(colors.as_array().unwrap().len(), 10);
        assert_eq!(colors[0], "Белый");
    }
}
