pub mod adapter;
pub mod element;
pub mod loader;
pub mod parser;
pub mod store;
pub mod stylesheet;
pub mod terrain;
