mod harness;

pub use harness::{parse_certificate, TestDaemon, CODE};
