use std::sync::Arc;

use super::config::RouteSettings;
use crate::session::SessionBroker;

/// Shared state for session route handlers.
#[derive(Clone)]
pub(super) struct AuthState {
    pub(super) broker: Arc<SessionBroker>,
    pub(super) settings: RouteSettings,
}

