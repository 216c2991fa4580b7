pub mod models;
pub mod writer;
