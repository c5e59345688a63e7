//! Jobs feature module
//!
//! Submitting a job never blocks on the build: the response carries the job
//! id and the client polls until the artifact is ready or failed.

pub mod routes;


pub use routes::jobs_routes;
