use std::sync::Arc;

use tasktalk_sync::{AuthFacade, Backend};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub backend: Backend,
    pub auth: AuthFacade,
}

impl AppStateInner {
    pub fn new(backend: Backend) -> AppState {
        Arc::new(Self {
            auth: AuthFacade::new(backend.clone()),
            backend,
        })
    }
}
