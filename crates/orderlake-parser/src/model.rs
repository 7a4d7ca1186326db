use polars::prelude::DataFrame;

pub const ORDER_DATE: &str = "order_date";
pub const UNIT_PRICE: &str = "unit_price";
pub const QUANTITY: &str = "quantity";
pub const SHIPPING_STATE: &str = "shipping_state";
pub const CATEGORY: &str = "category";
pub const CUSTOMER_ID: &str = "customer_id";
pub const ASIN: &str = "asin";
pub const PRODUCT_TITLE: &str = "product_title";

/// Column order of every frame produced by the parsers.
pub const RAW_ORDER_COLUMNS: [&str; 8] = [
    ORDER_DATE,
    UNIT_PRICE,
    QUANTITY,
    SHIPPING_STATE,
    CATEGORY,
    CUSTOMER_ID,
    ASIN,
    PRODUCT_TITLE,
];

/// Raw order records as read from a bulk export, one row per purchase line.
///
/// `order_date` is a `Date` column, `unit_price` is `Float64`, `quantity` is
/// `Int64` and every other column is a nullable string. Columns missing from
/// the source file (product code, title) are present and entirely null.
#[derive(Debug, Clone)]
pub struct RawOrders {
    pub parser: &'static str,
    pub df: DataFrame,
    /// Rows whose order date could not be interpreted; they are kept with a null date.
    pub unparsed_dates: usize,
}

impl RawOrders {
    pub fn height(&self) -> usize {
        self.df.height()
    }
}
