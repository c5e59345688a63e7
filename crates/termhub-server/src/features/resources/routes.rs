//! Resource routes

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::features::FeatureState;

/// Create resource routes
pub fn resources_routes() -> Router<FeatureState> {
    Router::new().route("/resources", get(list_resources))
}

/// One selectable resource
#[derive(Debug, Serialize)]
pub struct ResourceSummary {
    pub name: &'static str,
    pub resource: &'static str,
    pub entity_type: &'static str,
    /// Resource whose pairs this one duplicates
    pub reference: Option<&'static str>,
    pub dumps: Vec<String>,
    /// Every dump file is present locally
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct ResourceList {
    pub resources: Vec<ResourceSummary>,
}

/// List resources
///
/// GET /resources
async fn list_resources(State(state): State<FeatureState>) -> Json<ResourceList> {
    let registry = state.jobs.registry();
    let dump_dir = state.jobs.dump_dir();
    let resources = registry
        .names()
        .into_iter()
        .filter_map(|name| registry.get(name).ok())
        .map(|descriptor| ResourceSummary {
            name: descriptor.name,
            resource: descriptor.resource_label,
            entity_type: descriptor.entity_type,
            reference: descriptor.reference,
            dumps: descriptor.dump_names(),
            available: descriptor.is_available(dump_dir),
        })
        .collect();
    Json(ResourceList { resources })
}
