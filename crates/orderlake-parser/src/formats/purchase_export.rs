use crate::errors::ParserError;
use crate::model::RawOrders;
use crate::registry::OrdersParser;

use super::{parse_with_field_map, OrderField};

/// Consumer purchase exports with human-readable headers
/// (`Order Date`, `Purchase Price Per Unit`, `Survey ResponseID`, ...).
pub struct PurchaseExportParser;

impl PurchaseExportParser {
    const NAME: &'static str = "PURCHASE_EXPORT";

    fn classify_column(column: &str) -> Option<OrderField> {
        let lower = column.to_ascii_lowercase();
        match lower.as_str() {
            "order date" => Some(OrderField::OrderDate),
            "purchase price per unit" => Some(OrderField::UnitPrice),
            "quantity" => Some(OrderField::Quantity),
            "shipping address state" => Some(OrderField::ShippingState),
            "category" => Some(OrderField::Category),
            "survey responseid" | "survey response id" => Some(OrderField::CustomerId),
            "asin/isbn (product code)" | "asin" => Some(OrderField::Asin),
            "title" => Some(OrderField::ProductTitle),
            _ => None,
        }
    }
}

impl OrdersParser for PurchaseExportParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(&self, content: &[u8]) -> Result<RawOrders, ParserError> {
        parse_with_field_map(Self::NAME, content, Self::classify_column)
    }
}
