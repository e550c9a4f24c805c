mod catalog;
mod recommendation;
mod resource;
mod usage;

pub use catalog::*;
pub use recommendation::*;
pub use resource::*;
pub use usage::*;
