//! Column names of the unified analytical row shared by both pipelines.

pub use orderlake_parser::model::{
    ASIN, CATEGORY, CUSTOMER_ID, ORDER_DATE, PRODUCT_TITLE, QUANTITY, SHIPPING_STATE, UNIT_PRICE,
};

pub const YEAR: &str = "year";
pub const MONTH: &str = "month";
pub const DAY: &str = "day";
pub const WEEK: &str = "week";
pub const QUARTER: &str = "quarter";
pub const DAY_OF_WEEK: &str = "day_of_week";
pub const IS_WEEKEND: &str = "is_weekend";
pub const IS_BLACK_FRIDAY_WEEK: &str = "is_black_friday_week";
pub const REVENUE: &str = "revenue";

/// Columns added by the shared derivation, in the order they appear.
pub const DERIVED_COLUMNS: [&str; 9] = [
    YEAR,
    MONTH,
    DAY,
    WEEK,
    QUARTER,
    DAY_OF_WEEK,
    IS_WEEKEND,
    IS_BLACK_FRIDAY_WEEK,
    REVENUE,
];

// Incremental sync extras.
pub const ORDER_TIMESTAMP: &str = "order_timestamp";
pub const ORDER_ID: &str = "order_id";
pub const ORDER_ITEM_ID: &str = "order_item_id";
pub const ORDER_NUMBER: &str = "order_number";
pub const STATUS: &str = "status";
pub const PAYMENT_STATUS: &str = "payment_status";
pub const SHIPPING_CITY: &str = "shipping_city";
pub const SHIPPING_COUNTRY: &str = "shipping_country";
pub const SHIPPING_ADDRESS_LINE1: &str = "shipping_address_line1";
pub const SHIPPING_POSTAL_CODE: &str = "shipping_postal_code";
pub const TOTAL_AMOUNT: &str = "total_amount";
pub const IMAGE_URL: &str = "image_url";
pub const ETL_TIMESTAMP: &str = "etl_timestamp";
pub const DATA_SOURCE: &str = "data_source";

pub const UNKNOWN_STATE: &str = "UNKNOWN";
pub const UNKNOWN_CATEGORY: &str = "Unknown";
pub const UNKNOWN_CITY: &str = "UNKNOWN";
pub const DEFAULT_COUNTRY: &str = "US";
pub const CURRENT_ORDERS_CATEGORY: &str = "CURRENT_ORDERS";
pub const OLTP_SYNC_SOURCE: &str = "OLTP_SYNC";

/// Hive-style partition columns of the incremental dataset.
pub const INCREMENTAL_PARTITIONS: [&str; 2] = [YEAR, MONTH];
