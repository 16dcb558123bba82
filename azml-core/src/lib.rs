//! azml Core
//!
//! Resource model, schemas and planning for managing Azure Machine Learning
//! resources. Side effects are represented as values and executed by a
//! Provider only when a plan is applied.

pub mod config;
pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
