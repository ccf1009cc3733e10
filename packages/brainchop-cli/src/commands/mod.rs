pub mod conform;
pub mod info;
pub mod labels;
pub mod models;
