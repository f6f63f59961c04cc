use crate::bindings::util::{apply_headers_from_json, collect_headers};
use crate::events::HostEvent;
use reqwest::{Client, Method};
use std::collections::HashMap;
use tokio::task::AbortHandle;

/// Parameters of a single `XMLHttpRequest.send()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub id: u64,
    pub method: String,
    pub url: String,
    pub headers_json: Option<String>,
    pub body: Option<String>,
}

/// In-flight HTTP requests; an entry lives from `request` until its completion is dispatched or it is aborted.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    next_id: u64,
    in_flight: HashMap<u64, Option<AbortHandle>>,
}

impl RequestRegistry {
    /// Reserve a request id.
    pub fn allocate_id(&mut self) -> u64 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.in_flight.insert(self.next_id, None);
        self.next_id
    }

    /// Attach the task running request `id` so it can be aborted.
    pub fn attach(&mut self, id: u64, handle: AbortHandle) {
        if let Some(slot) = self.in_flight.get_mut(&id) {
            *slot = Some(handle);
        }
    }

    /// Abort request `id`; its completion will never be dispatched.
    pub fn abort(&mut self, id: u64) {
        if let Some(Some(handle)) = self.in_flight.remove(&id) {
            handle.abort();
        }
    }

    /// Forget request `id` after its completion was dispatched.
    /// Returns false when the request had been aborted in the meantime.
    pub fn release(&mut self, id: u64) -> bool {
        self.in_flight.remove(&id).is_some()
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// True when no request is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Perform the request and describe the outcome as a `RequestDone` event.
pub async fn perform_request(client: Client, request: HttpRequest) -> HostEvent {
    let id = request.id;
    let url = request.url.clone();
    match fetch_http(client, request).await {
        Ok(done) => done,
        Err(error) => HostEvent::RequestDone {
            id,
            status: 0,
            status_text: String::new(),
            headers: Vec::new(),
            body: String::new(),
            url,
            error: Some(error),
        },
    }
}

async fn fetch_http(client: Client, request: HttpRequest) -> Result<HostEvent, String> {
    let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("Unsupported method: {}", request.method))?;
    let mut req = client.request(method, request.url.as_str());
    if let Some(headers_json) = request.headers_json.as_deref() {
        req = apply_headers_from_json(req, headers_json);
    }
    if let Some(body) = request.body {
        req = req.body(body);
    }

    let resp = req
        .send()
        .await
        .map_err(|error| format!("Network error: {error}"))?;
    let status = resp.status().as_u16();
    let status_text = resp.status().canonical_reason().unwrap_or("").to_owned();
    let headers = collect_headers(&resp);
    let final_url = resp.url().to_string();
    let body = resp
        .text()
        .await
        .map_err(|error| format!("Read body error: {error}"))?;
    Ok(HostEvent::RequestDone {
        id: request.id,
        status,
        status_text,
        headers,
        body,
        url: final_url,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_requests_are_not_released_twice() {
        let mut registry = RequestRegistry::default();
        let first = registry.allocate_id();
        let second = registry.allocate_id();
        assert_eq!((first, second), (1, 2));
        assert_eq!(registry.len(), 2);

        registry.abort(first);
        assert!(!registry.release(first));
        assert!(registry.release(second));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unsupported_method_reports_error_event() {
        let request = HttpRequest {
            id: 5,
            method: String::from("BAD METHOD"),
            url: String::from("http://127.0.0.1:9/"),
            headers_json: None,
            body: None,
        };
        let HostEvent::RequestDone { id, status, error, .. } =
            perform_request(Client::new(), request).await
        else {
            unreachable!("perform_request only yields RequestDone");
        };
        assert_eq!((id, status), (5, 0));
        assert!(error.is_some_and(|message| message.starts_with("Unsupported method")));
    }
}
