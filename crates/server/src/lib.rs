pub mod routes;
pub mod startup;
pub mod middleware;
pub mod errors;

pub use startup::run;
