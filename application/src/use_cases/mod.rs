//! Use cases
//!
//! Application-level operations that orchestrate domain logic.

pub mod consult_oracle;
pub mod execute_action;
pub mod run_engagement;
pub mod shared;

#[cfg(test)]
pub(crate) mod test_support;
