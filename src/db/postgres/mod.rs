mod catalog;

pub use catalog::{PostgresCatalogRepo, PostgresCatalogStore};
