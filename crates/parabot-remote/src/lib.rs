pub mod auth;
pub mod drive;
pub mod locator;
#[cfg(any(test, feature = "testkit"))]
pub mod memory;
pub mod store;
pub mod sync;
