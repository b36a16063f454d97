#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod association;
pub mod config;
pub mod data;
pub mod dataset;
pub mod incidence;
pub mod linear;
pub mod metrics;
pub mod model;
pub mod network;
pub mod output;
pub mod penalized;
pub mod pipeline;
pub mod selection;
pub mod solver;
