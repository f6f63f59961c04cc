use reqwest::RequestBuilder;
use reqwest::Response;
use serde_json::Value;

/// Apply headers serialized by the prelude, either `{"name": "value"}` or `[["name", "value"], ...]`.
/// The array form preserves repeated headers.
#[inline]
pub fn apply_headers_from_json(mut req: RequestBuilder, headers_json: &str) -> RequestBuilder {
    let Ok(parsed) = serde_json::from_str::<Value>(headers_json) else {
        return req;
    };
    if let Some(map) = parsed.as_object() {
        for (name, value) in map {
            if let Some(text) = value.as_str() {
                req = req.header(name, text);
            }
        }
        return req;
    }
    for pair in parsed.as_array().into_iter().flatten() {
        let Some(name) = pair.get(0).and_then(Value::as_str) else {
            continue;
        };
        let Some(value) = pair.get(1).and_then(Value::as_str) else {
            continue;
        };
        req = req.header(name, value);
    }
    req
}

/// Response headers as `(name, value)` pairs, skipping values that are not valid text.
#[inline]
pub fn collect_headers(resp: &Response) -> Vec<(String, String)> {
    resp.headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|text| (name.to_string(), text.to_owned()))
        })
        .collect()
}
