use serde::{Deserialize, Serialize};

pub const PRODUCTS: &str = "products";
pub const ORDERS: &str = "orders";
pub const USERS: &str = "users";
pub const GALLERY: &str = "gallery";

/// Palette offered by the product form
pub const DEFAULT_COLORS: [&str; 10] = [
    "Белый",
    "Черный",
    "Коричневый",
    "Серый",
    "Бежевый",
    "Орех",
    "Дуб",
    "Венге",
    "Махагон",
    "Вишня",
];

// ========== PRODUCT ==========
/// Price range in BYN
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min >= 0.0 && self.min <= self.max
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub price: PriceRange,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub colors: Vec<String>,
    /// Object-store URLs as uploaded, never proxied paths
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub in_stock: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Product {
    /// Case-insensitive match on name or category
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query) || self.category.to_lowercase().contains(&query)
    }
}

/// Product as listed by the console, with image URLs ready for the browser
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub display_images: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub price: PriceRange,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default = "default_true")]
    pub in_stock: bool,
    #[serde(default)]
    pub featured: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_stock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured: Option<bool>,
}

// ========== DASHBOARD ==========
#[derive(Debug, Serialize, Default, PartialEq)]
pub struct DashboardStats {
    pub products: usize,
    pub orders: usize,
    pub users: usize,
    pub gallery: usize,
}

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub stats: DashboardStats,
    pub recent_orders: Vec<serde_json::Value>,
}
