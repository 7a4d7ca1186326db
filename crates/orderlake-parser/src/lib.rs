pub mod errors;
pub mod formats;
pub mod model;
mod registry;

pub use errors::{ParserAttempt, ParserError};
pub use model::{RawOrders, RAW_ORDER_COLUMNS};
pub use registry::{parse_orders_file, parse_with_parsers, OrdersParser};
