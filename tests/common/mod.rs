pub mod asserts;
pub mod fixtures;
pub mod testing;

pub use asserts::*;
pub use fixtures::*;
pub use testing::*;
