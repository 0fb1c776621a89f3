use axum::Router;
use dog_upload::UploadSession;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes::upload_router;
use crate::UploadState;

#[derive(Clone)]
pub struct UploadApp {
    pub state: UploadState,
    routes: Router<()>,
}

impl UploadApp {
    pub fn new(session: UploadSession) -> Self {
        let state = UploadState::new(session);
        Self {
            routes: upload_router(state.clone()),
            state,
        }
    }

    /// Mount extra routes next to the upload endpoint
    pub fn use_router(mut self, path: &str, router: Router<()>) -> Self {
        self.routes = self.routes.nest(path, router);
        self
    }

    /// Every route wrapped in request-id and tracing middleware
    pub fn router(&self) -> Router<()> {
        self.routes.clone().layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Upload server listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
