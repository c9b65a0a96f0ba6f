use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::TestSession;

/// Shared handler state. One session per process; commands are serialized
/// through the mutex, so a blocking start holds it until the run ends.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<TestSession>>,
}

impl AppState {
    pub fn new(session: TestSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }
}
