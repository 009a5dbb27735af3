mod defaults;
mod operator;
mod tree;

pub use defaults::{DefaultArgs, DEFAULT_ARGS_KEY};
pub use operator::{parse_duration, OperatorConfig, DEFAULT_STORE_FAILURE_TIMEOUT};
pub use tree::ConfigTree;
