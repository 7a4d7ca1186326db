//! Calendar dimensions, revenue and dimension normalization shared by both pipelines.

use polars::prelude::*;

use crate::schema::{
    CATEGORY, DAY, DAY_OF_WEEK, IS_BLACK_FRIDAY_WEEK, IS_WEEKEND, MONTH, ORDER_DATE, QUANTITY,
    QUARTER, REVENUE, SHIPPING_STATE, UNIT_PRICE, UNKNOWN_CATEGORY, UNKNOWN_STATE, WEEK, YEAR,
};

const BLACK_FRIDAY_MONTH: i32 = 11;
const BLACK_FRIDAY_FIRST_DAY: i32 = 22;
const BLACK_FRIDAY_LAST_DAY: i32 = 28;

/// Adds the calendar columns and revenue, and normalizes state and category.
///
/// Expects `order_date` (Date), `unit_price`, `quantity`, `shipping_state` and
/// `category`. All derived flags and date parts are Int32; revenue is Float64.
/// A null order date yields null date parts and zero flags.
pub fn derive_order_columns(lf: LazyFrame) -> LazyFrame {
    let date = || col(ORDER_DATE).cast(DataType::Date);

    lf.with_columns([
        date().dt().year().cast(DataType::Int32).alias(YEAR),
        date().dt().month().cast(DataType::Int32).alias(MONTH),
        date().dt().day().cast(DataType::Int32).alias(DAY),
        date().dt().week().cast(DataType::Int32).alias(WEEK),
        date().dt().quarter().cast(DataType::Int32).alias(QUARTER),
        // ISO weekday is 1 = Monday .. 7 = Sunday; shift to 1 = Sunday .. 7 = Saturday.
        ((date().dt().weekday().cast(DataType::Int32) % lit(7)) + lit(1)).alias(DAY_OF_WEEK),
        (col(UNIT_PRICE).cast(DataType::Float64) * col(QUANTITY).cast(DataType::Float64))
            .alias(REVENUE),
        normalized_state(col(SHIPPING_STATE)).alias(SHIPPING_STATE),
        normalized_category(col(CATEGORY)).alias(CATEGORY),
    ])
    .with_columns([
        flag(col(DAY_OF_WEEK).eq(lit(1)).or(col(DAY_OF_WEEK).eq(lit(7)))).alias(IS_WEEKEND),
        flag(
            col(MONTH)
                .eq(lit(BLACK_FRIDAY_MONTH))
                .and(col(DAY).gt_eq(lit(BLACK_FRIDAY_FIRST_DAY)))
                .and(col(DAY).lt_eq(lit(BLACK_FRIDAY_LAST_DAY))),
        )
        .alias(IS_BLACK_FRIDAY_WEEK),
    ])
}

/// Trimmed, upper-cased state; null or blank becomes `UNKNOWN`.
pub fn normalized_state(expr: Expr) -> Expr {
    let cleaned = trimmed(expr).str().to_uppercase();
    or_default(cleaned, UNKNOWN_STATE)
}

/// Trimmed category; null or blank becomes `Unknown`.
pub fn normalized_category(expr: Expr) -> Expr {
    or_default(trimmed(expr), UNKNOWN_CATEGORY)
}

fn trimmed(expr: Expr) -> Expr {
    expr.cast(DataType::String)
        .str()
        .replace_all(lit(r"^\s+|\s+$"), lit(""), false)
}

fn or_default(expr: Expr, default: &str) -> Expr {
    let expr = expr.fill_null(lit(""));
    when(expr.clone().eq(lit("")))
        .then(lit(default.to_string()))
        .otherwise(expr)
}

fn flag(condition: Expr) -> Expr {
    when(condition.fill_null(lit(false)))
        .then(lit(1i32))
        .otherwise(lit(0i32))
        .cast(DataType::Int32)
}
