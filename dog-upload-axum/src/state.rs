use std::sync::Arc;

use dog_upload::UploadSession;

#[derive(Clone)]
pub struct UploadState {
    pub session: Arc<UploadSession>,
}

impl UploadState {
    pub fn new(session: UploadSession) -> Self {
        Self {
            session: Arc::new(session),
        }
    }
}
