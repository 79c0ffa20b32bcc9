//! # Prompt Template Modules
//!
//! Templates for the SQL generation stage. `core` holds the text; rendering
//! lives in the context assembler, which knows what fits the budget.

pub mod core;
