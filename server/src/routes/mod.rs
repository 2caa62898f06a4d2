mod admin;
pub mod app_router;

pub use app_router::{AdminState, AppRouter};
