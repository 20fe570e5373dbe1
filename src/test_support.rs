use axum::Router;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Serves `router` on an ephemeral localhost port.
pub async fn spawn_server(router: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, handle)
}
