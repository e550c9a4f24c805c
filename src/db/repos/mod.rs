mod catalog;
mod catalog_store;

pub use catalog::*;
pub use catalog_store::*;
pub(crate) use catalog_store::{ColumnTypes, create_index_sql, create_table_sql};
