use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use dpconsole::server::{self, AppState};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The local server on an ephemeral port, stopped on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _running: Running,
}

impl TestServer {
    pub async fn start(state: AppState) -> Self {
        let served = state.clone();
        let (addr, running) = spawn_on_ephemeral_port(|listener, signal| async move {
            server::serve(listener, served, signal)
                .await
                .expect("server failed");
        })
        .await;

        Self {
            addr,
            state,
            _running: running,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }
}

/// Hand-written collaborator routes on an ephemeral port, stopped on drop.
pub struct StubServer {
    pub addr: SocketAddr,
    _running: Running,
}

impl StubServer {
    pub async fn start(router: Router) -> Self {
        let (addr, running) = spawn_on_ephemeral_port(|listener, signal| async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
                .expect("stub server failed");
        })
        .await;

        Self {
            addr,
            _running: running,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }
}

struct Running {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

async fn spawn_on_ephemeral_port<F, Fut>(run: F) -> (SocketAddr, Running)
where
    F: FnOnce(TcpListener, std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown, signal) = oneshot::channel::<()>();

    let handle = tokio::spawn(run(
        listener,
        Box::pin(async move {
            let _ = signal.await;
        }),
    ));

    (
        addr,
        Running {
            shutdown: Some(shutdown),
            handle: Some(handle),
        },
    )
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
