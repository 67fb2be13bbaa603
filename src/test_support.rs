//! One-shot loopback HTTP server for exercising the blocking clients.

use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::TcpListener;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

async fn capture(request: Request<Body>) -> CapturedRequest {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = parts
        .headers
        .iter()
        .map(|(key, value)| {
            (
                key.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = hyper::body::to_bytes(body).await.unwrap();
    CapturedRequest {
        request_line: format!("{} {} HTTP/1.1", parts.method, path),
        headers,
        body: body.to_vec(),
    }
}

/// Serve exactly one request with `status` and `body`, returning the base URL
/// and a channel yielding what the client sent.
pub fn serve_once(status: u16, body: &str) -> (String, Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let base = format!("http://{}/", listener.local_addr().unwrap());
    let status = StatusCode::from_u16(status).unwrap();
    let body = body.to_string();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let done = Arc::new(Notify::new());
            let finished = done.clone();

            let make_service = make_service_fn(move |_conn| {
                let tx = tx.clone();
                let body = body.clone();
                let done = done.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |request| {
                        let tx = tx.clone();
                        let body = body.clone();
                        let done = done.clone();
                        async move {
                            let captured = capture(request).await;
                            let _ = tx.send(captured);
                            done.notify_one();
                            Response::builder()
                                .status(status)
                                .header(header::CONTENT_TYPE, "application/json")
                                .header(header::CONNECTION, "close")
                                .body(Body::from(body))
                        }
                    }))
                }
            });

            Server::from_tcp(listener)
                .unwrap()
                .serve(make_service)
                .with_graceful_shutdown(async move { finished.notified().await })
                .await
                .unwrap();
        });
    });

    (base, rx)
}
