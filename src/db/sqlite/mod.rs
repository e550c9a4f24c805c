mod catalog;

pub use catalog::{SqliteCatalogRepo, SqliteCatalogStore};
