//! This module contains Protobuf definitions for tests.
//! To regenerate, run `cargo run -p tonic-xds --example gen_test_proto`.

#[cfg(test)]
#[allow(unreachable_pub, missing_docs)]
pub(crate) mod helloworld;
