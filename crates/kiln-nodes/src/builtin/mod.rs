pub mod data;
pub mod file;
pub mod query;
pub mod search;
pub mod text;
