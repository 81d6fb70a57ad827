pub mod error;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod targets;
pub mod worker;
pub mod ws;

pub use routes::create_router;
pub use ws::ProgressMessage;
