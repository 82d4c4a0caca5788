pub mod aggregate;
pub mod definition;
pub mod engine;
pub mod inverted;
pub mod materialized;
pub mod posting;
pub(crate) mod worker;
