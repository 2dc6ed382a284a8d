mod postgres;

pub use postgres::{describe_target, dump_command};
