use async_trait::async_trait;
use crate::document_store::{
    new_document_id, newest_first, strip_id, Document, DocumentStore, Fields, StoreError,
};
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use serde_json::{Number, Value};
use std::collections::HashMap;

type Item = HashMap<String, AttributeValue>;

/// Single-table layout: PK=COLLECTION#{name}, SK={id}, one attribute per field
#[derive(Debug, Clone)]
pub struct DynamoDocumentStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoDocumentStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    fn key(collection: &str, id: &str) -> (AttributeValue, AttributeValue) {
        (
            AttributeValue::S(collection_pk(collection)),
            AttributeValue::S(id.to_string()),
        )
    }
}

fn collection_pk(collection: &str) -> String {
    format!("COLLECTION#{}", collection)
}

fn backend_error(context: &str, err: impl std::fmt::Display) -> StoreError {
    tracing::error!("DynamoDB {} failed: {}", context, err);
    StoreError::Backend(format!("{}: {}", context, err))
}

/// Convert a JSON value into the matching DynamoDB attribute
pub fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

fn parse_number(n: &str) -> Result<Value, StoreError> {
    if let Ok(i) = n.parse::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| StoreError::Malformed(format!("invalid number attribute {}", n)))
}

/// Convert a DynamoDB attribute back into JSON. Binary attributes have no
/// JSON form and are rejected.
pub fn from_attribute(attr: &AttributeValue) -> Result<Value, StoreError> {
    Ok(match attr {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => parse_number(n)?,
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::Ss(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(items) => Value::Array(
            items
                .iter()
                .map(|n| parse_number(n))
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::L(items) => Value::Array(
            items
                .iter()
                .map(from_attribute)
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), from_attribute(v)?)))
                .collect::<Result<_, StoreError>>()?,
        ),
        other => {
            return Err(StoreError::Malformed(format!(
                "unsupported attribute type {:?}",
                other
            )))
        }
    })
}

fn item_to_document(item: &Item) -> Result<Document, StoreError> {
    let id = item
        .get("SK")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| StoreError::Malformed("item without SK".to_string()))?
        .to_string();

    let mut fields = Fields::new();
    for (name, attr) in item {
        if name == "PK" || name == "SK" {
            continue;
        }
        fields.insert(name.clone(), from_attribute(attr)?);
    }

    Ok(Document { id, fields })
}

#[async_trait]
impl DocumentStore for DynamoDocumentStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let resp = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk")
                .expression_attribute_values(":pk", AttributeValue::S(collection_pk(collection)))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| backend_error("query", e))?;

            for item in resp.items() {
                documents.push(item_to_document(item)?);
            }

            match resp.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let (pk, sk) = Self::key(collection, id);

        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", pk)
            .key("SK", sk)
            .send()
            .await
            .map_err(|e| backend_error("get_item", e))?;

        result.item().map(item_to_document).transpose()
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<Document, StoreError> {
        let fields = strip_id(fields);
        let id = new_document_id();
        let (pk, sk) = Self::key(collection, &id);

        let mut item: Item = fields
            .iter()
            .map(|(name, value)| (name.clone(), to_attribute(value)))
            .collect();
        item.insert("PK".to_string(), pk);
        item.insert("SK".to_string(), sk);

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(PK)")
            .send()
            .await
            .map_err(|e| backend_error("put_item", e))?;

        Ok(Document { id, fields })
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Option<Document>, StoreError> {
        let fields = strip_id(fields);
        if fields.is_empty() {
            return self.get(collection, id).await;
        }

        // Placeholders for every field so reserved words like `name` are safe
        let mut update_expr = vec![];
        let mut expr_names = HashMap::new();
        let mut expr_values = HashMap::new();
        for (i, (name, value)) in fields.iter().enumerate() {
            update_expr.push(format!("#f{} = :v{}", i, i));
            expr_names.insert(format!("#f{}", i), name.clone());
            expr_values.insert(format!(":v{}", i), to_attribute(value));
        }

        let (pk, sk) = Self::key(collection, id);
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", pk)
            .key("SK", sk)
            .condition_expression("attribute_exists(PK)")
            .update_expression(format!("SET {}", update_expr.join(", ")))
            .set_expression_attribute_names(Some(expr_names))
            .set_expression_attribute_values(Some(expr_values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => output.attributes().map(item_to_document).transpose(),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Ok(None)
            }
            Err(e) => Err(backend_error("update_item", e)),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let (pk, sk) = Self::key(collection, id);

        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", pk)
            .key("SK", sk)
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| backend_error("delete_item", e))?;

        Ok(result.attributes().is_some_and(|attrs| !attrs.is_empty()))
    }

    async fn recent(
        &self,
        collection: &str,
        order_by: &str,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        // Collections here are small; sorting a full query beats keeping an
        // index per ordering field
        let documents = self.list(collection).await?;
        Ok(newest_first(documents, order_by, limit))
    }
}
