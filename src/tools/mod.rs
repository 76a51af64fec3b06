pub mod generate;
pub mod listmodels;
