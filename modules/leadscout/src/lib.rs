pub mod app;
pub mod browser;
pub mod cache;
pub mod catalog;
pub mod learning;
pub mod orchestrator;
pub mod scraper;
pub mod store;
pub mod term_generator;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod validator;
