//! # Example and Business Rule Stores
//!
//! Shared, read-mostly collections. Each write builds a new vector and swaps it
//! in, so concurrent questions read a consistent list without locking.

pub mod examples;
pub mod rules;

pub use examples::{ExampleQuery, ExampleStore};
pub use rules::{BusinessRule, BusinessRuleStore, NewBusinessRule};
