//! End-to-end engine tests: manifest text through apply and destroy.

mod apply_tests;
mod common;
mod destroy_tests;
