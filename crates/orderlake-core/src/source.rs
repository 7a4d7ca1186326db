//! Extraction of order headers and items from the transactional database.

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::checkpoint::Checkpoint;
use crate::config::CaptureMode;
use crate::db::DbPool;
use crate::error::Result;

/// One row of the `orders` table.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct OrderHeader {
    pub order_id: i64,
    pub user_id: Option<String>,
    pub order_number: Option<String>,
    pub status: Option<String>,
    pub total_amount: Option<f64>,
    pub currency: Option<String>,
    pub shipping_name: Option<String>,
    pub shipping_email: Option<String>,
    pub shipping_address_line1: Option<String>,
    pub shipping_address_line2: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_state: Option<String>,
    pub shipping_postal_code: Option<String>,
    pub shipping_country: Option<String>,
    pub shipping_phone: Option<String>,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub payment_transaction_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// One row of the `order_items` table.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct OrderItem {
    pub order_item_id: i64,
    pub order_id: i64,
    pub asin: Option<String>,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<i64>,
    pub subtotal: Option<f64>,
    pub image_url: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

/// Change-capture predicate: `order_id > last_order_id`, optionally widened to
/// rows created on or after `recent_since`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeFilter {
    pub last_order_id: i64,
    pub recent_since: Option<NaiveDate>,
}

impl ChangeFilter {
    pub fn new(checkpoint: &Checkpoint, today: NaiveDate, lookback_days: u32, mode: CaptureMode) -> Self {
        let recent_since = match mode {
            CaptureMode::IdOnly => None,
            CaptureMode::IdOrRecent => Some(
                today
                    .checked_sub_days(Days::new(u64::from(lookback_days)))
                    .unwrap_or(NaiveDate::MIN),
            ),
        };
        Self {
            last_order_id: checkpoint.last_order_id,
            recent_since,
        }
    }

    pub fn matches(&self, order_id: i64, created_at: Option<NaiveDateTime>) -> bool {
        if order_id > self.last_order_id {
            return true;
        }
        match (self.recent_since, created_at) {
            (Some(since), Some(created)) => created.date() >= since,
            _ => false,
        }
    }
}

#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_orders(&self, filter: &ChangeFilter) -> Result<Vec<OrderHeader>>;
    async fn fetch_order_items(&self, filter: &ChangeFilter) -> Result<Vec<OrderItem>>;
}

const ORDERS_QUERY: &str = r#"
    SELECT
        o.order_id::int8 AS order_id,
        o.user_id::text AS user_id,
        o.order_number::text AS order_number,
        o.status::text AS status,
        o.total_amount::float8 AS total_amount,
        o.currency::text AS currency,
        o.shipping_name::text AS shipping_name,
        o.shipping_email::text AS shipping_email,
        o.shipping_address_line1::text AS shipping_address_line1,
        o.shipping_address_line2::text AS shipping_address_line2,
        o.shipping_city::text AS shipping_city,
        o.shipping_state::text AS shipping_state,
        o.shipping_postal_code::text AS shipping_postal_code,
        o.shipping_country::text AS shipping_country,
        o.shipping_phone::text AS shipping_phone,
        o.payment_method::text AS payment_method,
        o.payment_status::text AS payment_status,
        o.payment_transaction_id::text AS payment_transaction_id,
        o.created_at::timestamp AS created_at,
        o.updated_at::timestamp AS updated_at
    FROM orders o
    WHERE o.order_id > $1
       OR ($2::date IS NOT NULL AND DATE(o.created_at) >= $2::date)
    ORDER BY o.order_id
"#;

const ORDER_ITEMS_QUERY: &str = r#"
    SELECT
        oi.order_item_id::int8 AS order_item_id,
        oi.order_id::int8 AS order_id,
        oi.asin::text AS asin,
        oi.title::text AS title,
        oi.price::float8 AS price,
        oi.quantity::int8 AS quantity,
        oi.subtotal::float8 AS subtotal,
        oi.image_url::text AS image_url,
        oi.created_at::timestamp AS created_at
    FROM order_items oi
    WHERE oi.order_id > $1
       OR ($2::date IS NOT NULL AND DATE(oi.created_at) >= $2::date)
    ORDER BY oi.order_id, oi.order_item_id
"#;

/// Reads from the `orders` and `order_items` tables with bound parameters.
#[derive(Clone)]
pub struct PgOrderSource {
    pool: DbPool,
}

impl PgOrderSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl OrderSource for PgOrderSource {
    async fn fetch_orders(&self, filter: &ChangeFilter) -> Result<Vec<OrderHeader>> {
        let rows = sqlx::query_as::<_, OrderHeader>(ORDERS_QUERY)
            .bind(filter.last_order_id)
            .bind(filter.recent_since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn fetch_order_items(&self, filter: &ChangeFilter) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItem>(ORDER_ITEMS_QUERY)
            .bind(filter.last_order_id)
            .bind(filter.recent_since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
    }

    #[test]
    fn id_or_recent_reselects_the_lookback_window() {
        let checkpoint = Checkpoint {
            last_order_id: 100,
            ..Checkpoint::default()
        };
        let filter = ChangeFilter::new(&checkpoint, today(), 1, CaptureMode::IdOrRecent);
        assert_eq!(filter.recent_since, NaiveDate::from_ymd_opt(2024, 1, 15));

        assert!(filter.matches(101, Some(at("2023-01-01 00:00:00"))));
        assert!(filter.matches(50, Some(at("2024-01-15 00:00:00"))));
        assert!(!filter.matches(50, Some(at("2024-01-14 23:59:59"))));
        assert!(!filter.matches(50, None));
    }

    #[test]
    fn id_only_ignores_dates() {
        let checkpoint = Checkpoint {
            last_order_id: 100,
            ..Checkpoint::default()
        };
        let filter = ChangeFilter::new(&checkpoint, today(), 1, CaptureMode::IdOnly);
        assert_eq!(filter.recent_since, None);
        assert!(!filter.matches(50, Some(at("2024-01-16 12:00:00"))));
        assert!(filter.matches(101, None));
    }

    #[test]
    fn zero_lookback_means_today() {
        let filter = ChangeFilter::new(&Checkpoint::default(), today(), 0, CaptureMode::IdOrRecent);
        assert_eq!(filter.recent_since, Some(today()));
    }
}
