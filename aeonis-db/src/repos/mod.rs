//! Repository modules for database operations

pub mod projects;
pub mod spans;

pub use projects::ProjectsRepo;
pub use spans::SpansRepo;
