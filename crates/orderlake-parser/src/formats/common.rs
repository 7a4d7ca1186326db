use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use polars::prelude::*;

use crate::errors::ParserError;
use crate::model::{
    RawOrders, ASIN, CATEGORY, CUSTOMER_ID, ORDER_DATE, PRODUCT_TITLE, QUANTITY, SHIPPING_STATE,
    UNIT_PRICE,
};

/// Days between 0001-01-01 (CE) and the Unix epoch; polars stores dates as days since epoch.
pub const EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum OrderField {
    OrderDate,
    UnitPrice,
    Quantity,
    ShippingState,
    Category,
    CustomerId,
    Asin,
    ProductTitle,
}

impl OrderField {
    const REQUIRED: [OrderField; 6] = [
        OrderField::OrderDate,
        OrderField::UnitPrice,
        OrderField::Quantity,
        OrderField::ShippingState,
        OrderField::Category,
        OrderField::CustomerId,
    ];

    fn canonical_name(&self) -> &'static str {
        match self {
            OrderField::OrderDate => ORDER_DATE,
            OrderField::UnitPrice => UNIT_PRICE,
            OrderField::Quantity => QUANTITY,
            OrderField::ShippingState => SHIPPING_STATE,
            OrderField::Category => CATEGORY,
            OrderField::CustomerId => CUSTOMER_ID,
            OrderField::Asin => ASIN,
            OrderField::ProductTitle => PRODUCT_TITLE,
        }
    }
}

#[derive(Default)]
struct OrderColumns {
    order_date: Vec<Option<i32>>,
    unit_price: Vec<Option<f64>>,
    quantity: Vec<Option<i64>>,
    shipping_state: Vec<Option<String>>,
    category: Vec<Option<String>>,
    customer_id: Vec<Option<String>>,
    asin: Vec<Option<String>>,
    product_title: Vec<Option<String>>,
}

impl OrderColumns {
    fn into_dataframe(self, parser: &'static str) -> Result<DataFrame, ParserError> {
        let frame_err = |source| ParserError::Frame { parser, source };

        let order_date = Series::new(ORDER_DATE.into(), self.order_date)
            .cast(&DataType::Date)
            .map_err(frame_err)?;

        DataFrame::new(vec![
            order_date.into(),
            Series::new(UNIT_PRICE.into(), self.unit_price).into(),
            Series::new(QUANTITY.into(), self.quantity).into(),
            Series::new(SHIPPING_STATE.into(), self.shipping_state).into(),
            Series::new(CATEGORY.into(), self.category).into(),
            Series::new(CUSTOMER_ID.into(), self.customer_id).into(),
            Series::new(ASIN.into(), self.asin).into(),
            Series::new(PRODUCT_TITLE.into(), self.product_title).into(),
        ])
        .map_err(frame_err)
    }
}

/// Reads a headered CSV export, mapping each header through `classify`.
///
/// Headers that do not classify are treated as free-form attributes and skipped.
/// Every field in [`OrderField::REQUIRED`] must be mapped or the file is a format
/// mismatch for this parser.
pub(crate) fn parse_with_field_map(
    parser: &'static str,
    content: &[u8],
    classify: impl Fn(&str) -> Option<OrderField>,
) -> Result<RawOrders, ParserError> {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content);

    let headers = reader
        .headers()
        .map_err(|source| ParserError::Csv { parser, source })?
        .clone();

    let mut field_positions: Vec<(OrderField, usize)> = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if let Some(field) = classify(header.trim()) {
            if field_positions.iter().any(|(existing, _)| *existing == field) {
                return Err(ParserError::FormatMismatch {
                    parser,
                    reason: format!("column '{}' mapped more than once", header.trim()),
                });
            }
            field_positions.push((field, idx));
        }
    }

    let missing: Vec<&str> = OrderField::REQUIRED
        .iter()
        .filter(|field| !field_positions.iter().any(|(mapped, _)| mapped == *field))
        .map(|field| field.canonical_name())
        .collect();
    if !missing.is_empty() {
        return Err(ParserError::FormatMismatch {
            parser,
            reason: format!("missing required columns: {}", missing.join(", ")),
        });
    }

    let mut columns = OrderColumns::default();
    let mut unparsed_dates = 0usize;
    let mut record = StringRecord::new();
    let mut row_index = 0usize;

    loop {
        let has_row = reader
            .read_record(&mut record)
            .map_err(|source| ParserError::Csv { parser, source })?;
        if !has_row {
            break;
        }
        row_index += 1;
        let line_index = record
            .position()
            .map(|pos| pos.line() as usize)
            .unwrap_or(row_index + 1);

        let mut date = None;
        let mut price = None;
        let mut quantity = None;
        let mut state = None;
        let mut category = None;
        let mut customer = None;
        let mut asin = None;
        let mut title = None;

        for (field, idx) in &field_positions {
            let raw = record.get(*idx).unwrap_or("");
            match field {
                OrderField::OrderDate => {
                    date = parse_order_date(raw);
                    if date.is_none() && !raw.trim().is_empty() {
                        unparsed_dates += 1;
                    }
                }
                OrderField::UnitPrice => {
                    price = parse_optional_f64(parser, raw, line_index, UNIT_PRICE)?;
                }
                OrderField::Quantity => {
                    quantity = parse_optional_i64(parser, raw, line_index, QUANTITY)?;
                }
                OrderField::ShippingState => state = optional_text(raw),
                OrderField::Category => category = optional_text(raw),
                OrderField::CustomerId => customer = optional_text(raw),
                OrderField::Asin => asin = optional_text(raw),
                OrderField::ProductTitle => title = optional_text(raw),
            }
        }

        columns.order_date.push(date);
        columns.unit_price.push(price);
        columns.quantity.push(quantity);
        columns.shipping_state.push(state);
        columns.category.push(category);
        columns.customer_id.push(customer);
        columns.asin.push(asin);
        columns.product_title.push(title);
    }

    Ok(RawOrders {
        parser,
        df: columns.into_dataframe(parser)?,
        unparsed_dates,
    })
}

/// Interprets an order date cell, returning days since the Unix epoch.
///
/// Accepts plain dates, timestamps with optional fractional seconds, RFC 3339 and
/// US-style `MM/DD/YYYY`. Anything else yields `None`.
pub fn parse_order_date(value: &str) -> Option<i32> {
    static DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
    static DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.date_naive())
        })?;

    Some(date.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
}

fn optional_text(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_optional_i64(
    parser: &'static str,
    value: &str,
    line_index: usize,
    column: &str,
) -> Result<Option<i64>, ParserError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    if let Ok(parsed) = trimmed.parse::<i64>() {
        return Ok(Some(parsed));
    }
    // Exports occasionally write whole quantities as "2.0".
    match trimmed.parse::<f64>() {
        Ok(parsed) if parsed.fract() == 0.0 && parsed.is_finite() => Ok(Some(parsed as i64)),
        _ => Err(ParserError::DataRow {
            parser,
            line_index,
            message: format!("failed to parse column '{column}' as integer: '{trimmed}'"),
        }),
    }
}

fn parse_optional_f64(
    parser: &'static str,
    value: &str,
    line_index: usize,
    column: &str,
) -> Result<Option<f64>, ParserError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return Ok(None);
    }

    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|err| ParserError::DataRow {
            parser,
            line_index,
            message: format!("failed to parse column '{column}' as float: {err}"),
        })
}
