mod canonical;
mod common;
mod purchase_export;

pub use canonical::CanonicalOrdersParser;
pub use purchase_export::PurchaseExportParser;

pub(crate) use common::{parse_with_field_map, OrderField};
pub use common::{parse_order_date, EPOCH_DAYS_FROM_CE};
