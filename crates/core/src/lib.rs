pub mod dispatcher;
pub mod error;
pub mod invocation;
pub mod params;
pub mod pool;
pub mod result;
pub mod scripting;
pub mod status;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
