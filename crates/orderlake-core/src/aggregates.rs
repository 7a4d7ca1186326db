use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{
    CATEGORY, CUSTOMER_ID, DAY, IS_BLACK_FRIDAY_WEEK, MONTH, QUANTITY, REVENUE, SHIPPING_STATE,
    WEEK, YEAR,
};

pub const ORDER_COUNT: &str = "order_count";
pub const TOTAL_QUANTITY: &str = "total_quantity";
pub const TOTAL_REVENUE: &str = "total_revenue";
pub const AVG_ORDER_VALUE: &str = "avg_order_value";
pub const UNIQUE_CUSTOMERS: &str = "unique_customers";
pub const STATE: &str = "state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateView {
    DailySales,
    StateSales,
    CategorySales,
    OlapCube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Measure {
    OrderCount,
    TotalQuantity,
    TotalRevenue,
    AvgOrderValue,
    UniqueCustomers,
}

impl Measure {
    fn expr(self) -> Expr {
        match self {
            Measure::OrderCount => len().cast(DataType::Int64).alias(ORDER_COUNT),
            Measure::TotalQuantity => col(QUANTITY)
                .cast(DataType::Int64)
                .sum()
                .alias(TOTAL_QUANTITY),
            Measure::TotalRevenue => col(REVENUE).sum().alias(TOTAL_REVENUE),
            Measure::AvgOrderValue => col(REVENUE).mean().alias(AVG_ORDER_VALUE),
            Measure::UniqueCustomers => col(CUSTOMER_ID)
                .drop_nulls()
                .n_unique()
                .cast(DataType::Int64)
                .alias(UNIQUE_CUSTOMERS),
        }
    }
}

impl AggregateView {
    pub const ALL: [AggregateView; 4] = [
        AggregateView::DailySales,
        AggregateView::StateSales,
        AggregateView::CategorySales,
        AggregateView::OlapCube,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AggregateView::DailySales => "daily_sales",
            AggregateView::StateSales => "state_sales",
            AggregateView::CategorySales => "category_sales",
            AggregateView::OlapCube => "olap_cube",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|view| view.name() == normalized)
    }

    /// Grouping keys in output order. Each entry is (source column, output name).
    fn keys(self) -> &'static [(&'static str, &'static str)] {
        match self {
            AggregateView::DailySales => &[
                (YEAR, YEAR),
                (MONTH, MONTH),
                (DAY, DAY),
                (IS_BLACK_FRIDAY_WEEK, IS_BLACK_FRIDAY_WEEK),
            ],
            AggregateView::StateSales => &[
                (YEAR, YEAR),
                (SHIPPING_STATE, STATE),
                (IS_BLACK_FRIDAY_WEEK, IS_BLACK_FRIDAY_WEEK),
            ],
            AggregateView::CategorySales => &[
                (YEAR, YEAR),
                (CATEGORY, CATEGORY),
                (IS_BLACK_FRIDAY_WEEK, IS_BLACK_FRIDAY_WEEK),
            ],
            AggregateView::OlapCube => &[
                (YEAR, YEAR),
                (MONTH, MONTH),
                (WEEK, WEEK),
                (DAY, DAY),
                (IS_BLACK_FRIDAY_WEEK, IS_BLACK_FRIDAY_WEEK),
                (SHIPPING_STATE, STATE),
                (CATEGORY, CATEGORY),
            ],
        }
    }

    pub fn key_columns(self) -> Vec<&'static str> {
        self.keys().iter().map(|(_, output)| *output).collect()
    }

    pub fn partition_columns(self) -> &'static [&'static str] {
        match self {
            AggregateView::DailySales | AggregateView::OlapCube => &[YEAR, MONTH],
            AggregateView::StateSales | AggregateView::CategorySales => &[YEAR],
        }
    }

    fn measures(self) -> &'static [Measure] {
        match self {
            AggregateView::DailySales => &[
                Measure::OrderCount,
                Measure::TotalQuantity,
                Measure::TotalRevenue,
                Measure::AvgOrderValue,
                Measure::UniqueCustomers,
            ],
            AggregateView::StateSales => &[
                Measure::OrderCount,
                Measure::TotalQuantity,
                Measure::TotalRevenue,
                Measure::UniqueCustomers,
            ],
            AggregateView::CategorySales => &[
                Measure::OrderCount,
                Measure::TotalQuantity,
                Measure::TotalRevenue,
            ],
            AggregateView::OlapCube => &[
                Measure::OrderCount,
                Measure::TotalQuantity,
                Measure::TotalRevenue,
                Measure::AvgOrderValue,
            ],
        }
    }

    pub fn measure_columns(self) -> Vec<&'static str> {
        self.measures()
            .iter()
            .map(|measure| match measure {
                Measure::OrderCount => ORDER_COUNT,
                Measure::TotalQuantity => TOTAL_QUANTITY,
                Measure::TotalRevenue => TOTAL_REVENUE,
                Measure::AvgOrderValue => AVG_ORDER_VALUE,
                Measure::UniqueCustomers => UNIQUE_CUSTOMERS,
            })
            .collect()
    }

    /// Groups the derived order frame and sorts the result by the group keys.
    pub fn compute(self, derived: LazyFrame) -> PolarsResult<DataFrame> {
        let group_keys: Vec<Expr> = self
            .keys()
            .iter()
            .map(|(source, output)| col(*source).alias(*output))
            .collect();
        let sort_keys: Vec<Expr> = self.key_columns().into_iter().map(col).collect();
        let aggs: Vec<Expr> = self.measures().iter().map(|m| m.expr()).collect();

        derived
            .group_by(group_keys)
            .agg(aggs)
            .sort_by_exprs(
                sort_keys,
                SortMultipleOptions::default()
                    .with_nulls_last(true)
                    .with_maintain_order(true),
            )
            .collect()
    }
}

impl std::fmt::Display for AggregateView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
