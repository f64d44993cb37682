pub mod calc;
pub mod core;
