use std::sync::Arc;

use botbridge_adapter::Adapter;

#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<Adapter>,
}
