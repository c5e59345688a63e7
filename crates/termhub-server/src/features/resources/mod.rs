//! Resource catalogue

pub mod routes;

pub use routes::resources_routes;
