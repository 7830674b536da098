#![allow(unused_imports)]

pub use super::claim::Entity as Claim;
