//! Local stand-in for the site and its CDN, used by the unit tests.

use crate::client::SiteClient;
use reqwest::Url;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub type Route = (&'static str, u16, Vec<u8>);

pub struct StubSite {
    addr: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StubSite {
    /// Serves each route's body with its status; anything else is a 404.
    pub fn start(routes: Vec<Route>) -> Self {
        Self::serve(routes, false)
    }

    /// Like `start`, but bodies are sent chunked, without a `Content-Length`.
    pub fn start_chunked(routes: Vec<Route>) -> Self {
        Self::serve(routes, true)
    }

    fn serve(routes: Vec<Route>, chunked: bool) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let addr = server.server_addr().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (shutdown, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let path = request.url().to_string();
            seen.lock().unwrap().push(path.clone());

            let response = match routes.iter().find(|(route, _, _)| *route == path) {
                Some((_, status, body)) if chunked => tiny_http::Response::new(
                    tiny_http::StatusCode(*status),
                    Vec::new(),
                    std::io::Cursor::new(body.clone()),
                    None,
                    None,
                ),
                Some((_, status, body)) => tiny_http::Response::from_data(body.clone()).with_status_code(*status),
                None => tiny_http::Response::from_string("not found").with_status_code(404),
            };
            let _ = request.respond(response);
        });

        Self {
            addr,
            requests,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// A client that accepts this server as the site and serves audio from `/audio/`.
    pub fn client(&self) -> SiteClient {
        let cdn_base = Url::parse(&self.url("/audio/")).unwrap();
        SiteClient::new(&self.addr, cdn_base).unwrap()
    }

    /// Paths requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubSite {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
