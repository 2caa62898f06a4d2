use axum::Router;
use tower_http::trace::TraceLayer;

use crate::{routes::admin, workflow::WorkflowEngine, ServerState};

#[derive(Clone)]
pub struct AdminState {
    pub state: ServerState,
    pub engine: WorkflowEngine,
}

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState, engine: WorkflowEngine) -> Router {
        Router::new()
            .nest("/admin", admin::router())
            .fallback(crate::handler_404)
            .layer(TraceLayer::new_for_http())
            .with_state(AdminState { state, engine })
    }
}
