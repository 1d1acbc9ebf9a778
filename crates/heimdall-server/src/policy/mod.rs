//! Policy resolution and TAN engine (§4.1, §4.2).

pub mod cache;
pub mod resolver;
pub mod tan;

pub use cache::RulesCache;
pub use resolver::resolve_rules;
