//! Scripted in-process transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{HttpResponse, Request, Transport};
use crate::error::{AppError, Result};

type Handler = Box<dyn Fn(&Request) -> Result<HttpResponse> + Send + Sync>;

enum Route {
    Handler(Handler),
    Sequence(Mutex<VecDeque<HttpResponse>>),
}

/// Routes requests by URL path suffix and counts calls per route.
pub struct FakeTransport {
    routes: Vec<(String, Route)>,
    calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<Request>>,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn route(
        mut self,
        path: &str,
        handler: impl Fn(&Request) -> Result<HttpResponse> + Send + Sync + 'static,
    ) -> Self {
        self.routes.push((path.to_string(), Route::Handler(Box::new(handler))));
        self
    }

    /// Serve `responses` in order; the last one repeats once the rest are used up.
    pub fn route_seq(mut self, path: &str, responses: Vec<HttpResponse>) -> Self {
        self.routes
            .push((path.to_string(), Route::Sequence(Mutex::new(responses.into()))));
        self
    }

    /// Sleep this long before answering every request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &Request) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let Some((path, route)) = self
            .routes
            .iter()
            .find(|(path, _)| request.url.ends_with(path.as_str()))
        else {
            return Ok(HttpResponse::status(404));
        };
        *self.calls.lock().unwrap().entry(path.clone()).or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match route {
            Route::Handler(h) => h(request),
            Route::Sequence(queue) => {
                let mut q = queue.lock().unwrap();
                let next = if q.len() > 1 { q.pop_front() } else { q.front().cloned() };
                next.ok_or_else(|| AppError::transient("fake", "empty response script"))
            }
        }
    }
}
