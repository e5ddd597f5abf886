//! infraplan-lib: manifest-to-plan provisioning engine
//!
//! This crate turns a declarative application manifest into provisioned
//! cloud resources:
//! - `manifest`: parsing and validation of the YAML manifest
//! - `naming`: deterministic, length-constrained resource names
//! - `graph`: expansion into provisioning units wired by declarative rules
//! - `plan`: layering of the unit graph into concurrent stages
//! - `execute`: stage-by-stage apply and destroy against a backend
//! - `outputs`: the result document of an apply

pub mod backend;
pub mod consts;
pub mod cost;
pub mod execute;
pub mod graph;
pub mod manifest;
pub mod naming;
pub mod outputs;
pub mod pipeline;
pub mod plan;
pub mod settings;
