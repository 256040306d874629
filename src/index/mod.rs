pub mod schema;

pub use schema::{FieldResolver, FieldSchema, FieldType};
