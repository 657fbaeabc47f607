pub mod countdown;
pub mod models;
pub mod registry;
