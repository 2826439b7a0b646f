//! Shared fixtures for the planning service integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use nodes::{PlanningService, ServiceConfig};
use pipeline::ClientKey;

#[path = "../../src/testing.rs"]
mod fixtures;

pub use fixtures::*;

pub fn client(key: &str) -> ClientKey {
    ClientKey::new(key).unwrap()
}

pub fn service_with(scripted: Arc<ScriptedService>, config: ServiceConfig) -> PlanningService {
    PlanningService::new(config, scripted)
}
