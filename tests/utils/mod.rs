pub mod fixtures;
pub mod test_harness;

pub use test_harness::{wait_until, TestService};
