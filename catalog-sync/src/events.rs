//! Product change events as published by the catalog service
//!
//! Wire contract (UTF-8 JSON object):
//!
//! | field                      | type   | required |
//! |----------------------------|--------|----------|
//! | `id`                       | int    | yes      |
//! | `name`                     | string | yes      |
//! | `description`              | string | no       |
//! | `price`                    | number | no       |
//! | `quantityAvailableInStock` | int    | no       |
//! | `category`                 | string | no       |
//!
//! A body that is not such an object is malformed. An object that lacks `id`
//! or `name` decodes fine but is an [`InvalidEvent`].

use std::fmt;

use catalog_store::{ProductId, ProductMetadata, DEFAULT_CATEGORY};
use serde::{Deserialize, Serialize};

use crate::error::{InvalidEvent, Result, SyncError};

/// Routing key of product creation events
pub const ROUTING_KEY_CREATED: &str = "product.created";
/// Routing key of product update events
pub const ROUTING_KEY_UPDATED: &str = "product.updated";

/// Message body as sent by the producer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPayload {
    pub id: Option<ProductId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub quantity_available_in_stock: Option<i64>,
    pub category: Option<String>,
}

impl ProductPayload {
    /// Decode a message body
    pub fn decode(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)?;
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(SyncError::MalformedPayload(
                "body is not a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Updated,
}

impl EventType {
    pub fn from_routing_key(routing_key: &str) -> Option<Self> {
        match routing_key {
            ROUTING_KEY_CREATED => Some(EventType::Created),
            ROUTING_KEY_UPDATED => Some(EventType::Updated),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Created => write!(f, "created"),
            EventType::Updated => write!(f, "updated"),
        }
    }
}

/// A validated change event with defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    pub category: String,
    pub event_type: EventType,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ChangeEvent {
    /// Validate required fields and fill in defaults
    pub fn from_payload(
        payload: ProductPayload,
        event_type: EventType,
    ) -> std::result::Result<Self, InvalidEvent> {
        let product_id = payload.id.ok_or(InvalidEvent::MissingProductId)?;
        let name = non_blank(payload.name).ok_or(InvalidEvent::MissingName(product_id))?;

        Ok(Self {
            product_id,
            name,
            description: non_blank(payload.description),
            price: payload.price.unwrap_or(0.0),
            stock: payload.quantity_available_in_stock.unwrap_or(0),
            category: non_blank(payload.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            event_type,
        })
    }

    /// Denormalized text used for both the embedding and the lexical index
    pub fn content(&self) -> String {
        build_content(&self.name, &self.category, self.description.as_deref())
    }

    pub fn metadata(&self) -> ProductMetadata {
        ProductMetadata {
            price: self.price,
            category: self.category.clone(),
            stock: self.stock,
        }
    }
}

/// `Produto: {name}. Categoria: {category}. Descrição: {description}.`
pub fn build_content(name: &str, category: &str, description: Option<&str>) -> String {
    let mut content = format!("Produto: {}. Categoria: {}.", name, category);
    if let Some(description) = description {
        content.push_str(&format!(" Descrição: {}.", description));
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_payload() {
        let body = br#"{
            "id": 7,
            "name": "Guitarra Les Paul",
            "description": "Corpo em mogno",
            "price": 4599.9,
            "quantityAvailableInStock": 3,
            "category": "Guitarras"
        }"#;
        let payload = ProductPayload::decode(body).unwrap();
        assert_eq!(payload.id, Some(7));
        assert_eq!(payload.quantity_available_in_stock, Some(3));

        let event = ChangeEvent::from_payload(payload, EventType::Created).unwrap();
        assert_eq!(event.price, 4599.9);
        assert_eq!(event.stock, 3);
        assert_eq!(
            event.content(),
            "Produto: Guitarra Les Paul. Categoria: Guitarras. Descrição: Corpo em mogno."
        );
    }

    #[test]
    fn test_defaults_for_nullable_fields() {
        let payload = ProductPayload::decode(br#"{"id": 1, "name": "Palheta", "price": null}"#).unwrap();
        let event = ChangeEvent::from_payload(payload, EventType::Updated).unwrap();
        assert_eq!(event.price, 0.0);
        assert_eq!(event.stock, 0);
        assert_eq!(event.category, DEFAULT_CATEGORY);
        assert_eq!(event.content(), "Produto: Palheta. Categoria: Sem Categoria.");
    }

    #[test]
    fn test_legacy_stock_field_is_ignored() {
        let payload = ProductPayload::decode(br#"{"id": 1, "name": "Capo", "stock": 9}"#).unwrap();
        let event = ChangeEvent::from_payload(payload, EventType::Created).unwrap();
        assert_eq!(event.stock, 0);
    }

    #[test]
    fn test_missing_required_fields() {
        let payload = ProductPayload::decode(br#"{"name": "Capo"}"#).unwrap();
        assert_eq!(
            ChangeEvent::from_payload(payload, EventType::Created),
            Err(InvalidEvent::MissingProductId)
        );

        let payload = ProductPayload::decode(br#"{"id": 3, "name": "   "}"#).unwrap();
        assert_eq!(
            ChangeEvent::from_payload(payload, EventType::Created),
            Err(InvalidEvent::MissingName(3))
        );
    }

    #[test]
    fn test_malformed_bodies() {
        for body in [
            &b"{not json"[..],
            &b"[1, 2, 3]"[..],
            &b"\"just a string\""[..],
            &br#"{"id": "seven", "name": "Capo"}"#[..],
            &[0xff, 0xfe, 0x00][..],
        ] {
            assert!(
                matches!(ProductPayload::decode(body), Err(SyncError::MalformedPayload(_))),
                "{:?} should be malformed",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_event_type_from_routing_key() {
        assert_eq!(EventType::from_routing_key("product.created"), Some(EventType::Created));
        assert_eq!(EventType::from_routing_key("product.updated"), Some(EventType::Updated));
        assert_eq!(EventType::from_routing_key("product.deleted"), None);
    }
}
