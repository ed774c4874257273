#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use skydash::client::{HttpRequest, HttpResponse, Transport, TransportError, transport::TransportFuture};
use skydash::endpoints::{EndpointSet, PageContext, resolve};
use tokio_util::sync::CancellationToken;

pub const A: &str = "https://a.test";
pub const B: &str = "https://b.test";
pub const C: &str = "https://c.test";

#[derive(Clone)]
pub enum Reply {
    Respond(u16, String),
    NetworkError(String),
    /// Fire the caller's token, then never answer.
    CancelAndHang(CancellationToken),
}

impl Reply {
    pub fn status(code: u16) -> Self {
        Self::Respond(code, String::new())
    }

    pub fn json(body: &str) -> Self {
        Self::Respond(200, body.to_string())
    }
}

/// In-process transport answering by URL prefix; records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Later routes for the same prefix replace earlier ones.
    pub fn route(&self, prefix: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        routes.retain(|(existing, _)| existing != prefix);
        routes.push((prefix.to_string(), reply));
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.url).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn reply_for(&self, url: &str) -> Option<Reply> {
        let routes = self.routes.lock().unwrap();
        routes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, reply)| reply.clone())
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = self.reply_for(&request.url);
        Box::pin(async move {
            match reply {
                Some(Reply::Respond(code, body)) => Ok(HttpResponse::new(
                    request.url,
                    StatusCode::from_u16(code).unwrap(),
                    body,
                )),
                Some(Reply::NetworkError(message)) => Err(TransportError::Network(message)),
                Some(Reply::CancelAndHang(token)) => {
                    token.cancel();
                    std::future::pending().await
                }
                None => Err(TransportError::Network("no route to host".into())),
            }
        })
    }
}

pub fn endpoints(bases: &[&str]) -> EndpointSet {
    resolve(bases.iter().map(|b| Some(*b)), &PageContext::detached()).unwrap()
}
