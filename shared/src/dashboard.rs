use crate::document_store::{DocumentStore, StoreError};
use crate::responses;
use crate::types::{DashboardStats, DashboardSummary, GALLERY, ORDERS, PRODUCTS, USERS};
use lambda_http::{http::StatusCode, Body, Error, Response};

const RECENT_ORDERS_LIMIT: usize = 5;

async fn summarize<D: DocumentStore>(store: &D) -> Result<DashboardSummary, StoreError> {
    let stats = DashboardStats {
        products: store.list(PRODUCTS).await?.len(),
        orders: store.list(ORDERS).await?.len(),
        users: store.list(USERS).await?.len(),
        gallery: store.list(GALLERY).await?.len(),
    };

    let recent_orders = store
        .recent(ORDERS, "createdAt", RECENT_ORDERS_LIMIT)
        .await?
        .into_iter()
        .map(|doc| doc.into_value())
        .collect();

    Ok(DashboardSummary {
        stats,
        recent_orders,
    })
}

/// Handle `GET /api/dashboard`
pub async fn get_dashboard<D: DocumentStore>(store: &D) -> Result<Response<Body>, Error> {
    match summarize(store).await {
        Ok(summary) => responses::json(StatusCode::OK, &summary),
        Err(e) => {
            tracing::error!("Error fetching dashboard data: {}", e);
            responses::internal_error()
        }
    }
}
