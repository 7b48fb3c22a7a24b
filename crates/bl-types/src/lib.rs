pub mod dataset;
pub mod domain;
pub mod errors;
pub mod model;

pub use dataset::*;
pub use domain::*;
pub use errors::*;
pub use model::*;
