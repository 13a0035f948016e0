#![deny(
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Change-data-capture pipeline copying a MongoDB collection into a
//! Kafka topic: a bulk snapshot followed by an indefinite change-stream
//! tail, with a durable resume cursor (C9's assembly, defined in
//! [`context`], wires the rest of the `cdc-*` crates into one process).

pub mod context;
pub mod error;
pub mod health;
