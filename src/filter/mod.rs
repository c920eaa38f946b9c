pub mod entity;
pub mod fields;
pub mod list;
pub mod types;

pub use entity::EntityFilter;
pub use fields::{FieldSelect, FieldSpec};
pub use list::ListFilter;
pub use types::{FilterOp, QueryOptions, SortDirection};
