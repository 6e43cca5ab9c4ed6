pub mod config;
pub mod handlers;
pub mod routes;
pub mod types;
mod ws;

pub use config::ApiConfig;
pub use handlers::ApiState;
pub use routes::create_router;
