pub mod challenge;
pub mod pipeline;
pub mod scout;
pub mod session;
pub mod tabular;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
