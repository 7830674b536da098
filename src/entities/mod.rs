pub mod claim;
pub mod prelude;
