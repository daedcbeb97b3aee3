pub mod aggregate;
pub mod models;
pub mod parsing;
pub mod validation;
