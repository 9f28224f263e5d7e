pub mod client;
pub mod conditions;
pub mod connection_pool;
pub mod context;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod percentiles;
pub mod register;
pub mod request_builder;
pub mod template;
pub mod test_runner;
pub mod utils;
pub mod variables;
pub mod worker;
pub mod yaml_config;
