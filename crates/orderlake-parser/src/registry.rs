use crate::errors::{ParserAttempt, ParserError};
use crate::formats::{CanonicalOrdersParser, PurchaseExportParser};
use crate::model::RawOrders;

pub trait OrdersParser {
    fn name(&self) -> &'static str;
    fn parse(&self, content: &[u8]) -> Result<RawOrders, ParserError>;
}

pub fn parse_orders_file(content: &[u8]) -> Result<RawOrders, ParserError> {
    let purchase_export = PurchaseExportParser;
    let canonical = CanonicalOrdersParser;
    let parsers: [&dyn OrdersParser; 2] = [&purchase_export, &canonical];
    parse_with_parsers(content, &parsers)
}

pub fn parse_with_parsers(
    content: &[u8],
    parsers: &[&dyn OrdersParser],
) -> Result<RawOrders, ParserError> {
    let mut attempts = Vec::new();

    for parser in parsers {
        match parser.parse(content) {
            Ok(parsed) => return Ok(parsed),
            Err(ParserError::FormatMismatch { reason, .. }) => {
                attempts.push(ParserAttempt::new(parser.name(), reason));
            }
            Err(err) => return Err(err),
        }
    }

    Err(ParserError::NoMatchingParser { attempts })
}
