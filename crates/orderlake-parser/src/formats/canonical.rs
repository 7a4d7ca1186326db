use crate::errors::ParserError;
use crate::model::RawOrders;
use crate::registry::OrdersParser;

use super::{parse_with_field_map, OrderField};

/// Files already using the snake_case column names of the analytical schema.
pub struct CanonicalOrdersParser;

impl CanonicalOrdersParser {
    const NAME: &'static str = "CANONICAL_ORDERS";

    fn classify_column(column: &str) -> Option<OrderField> {
        match column {
            "order_date" => Some(OrderField::OrderDate),
            "unit_price" | "price" => Some(OrderField::UnitPrice),
            "quantity" => Some(OrderField::Quantity),
            "shipping_state" => Some(OrderField::ShippingState),
            "category" => Some(OrderField::Category),
            "customer_id" => Some(OrderField::CustomerId),
            "asin" => Some(OrderField::Asin),
            "product_title" | "title" => Some(OrderField::ProductTitle),
            _ => None,
        }
    }
}

impl OrdersParser for CanonicalOrdersParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(&self, content: &[u8]) -> Result<RawOrders, ParserError> {
        parse_with_field_map(Self::NAME, content, Self::classify_column)
    }
}
