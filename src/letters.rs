//! The demo route: one random lowercase letter per request.

use serde::Serialize;

use crate::error::BoxError;
use crate::{Request, Response};

#[derive(Debug, Serialize)]
struct Letter {
    char: char,
}

/// `GET /` → `200 OK`, `{"char":"q"}`.
pub async fn random_letter(_req: Request) -> Result<Response, BoxError> {
    let letter = Letter { char: fastrand::lowercase() };
    Ok(Response::json(serde_json::to_vec(&letter)?))
}

#[cfg(test)]
mod tests {
    use http::Method;
    use http::header::CONTENT_TYPE;

    use super::*;

    #[tokio::test]
    async fn body_is_one_lowercase_letter() {
        for _ in 0..200 {
            let req = Request::builder(Method::GET, "/").build().unwrap();
            let res = random_letter(req).await.unwrap();
            assert_eq!(res.headers()[CONTENT_TYPE], "application/json");

            let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
            let s = body["char"].as_str().unwrap();
            assert_eq!(s.len(), 1);
            assert!(s.chars().all(|c| c.is_ascii_lowercase()), "got {s:?}");
            assert_eq!(body.as_object().unwrap().len(), 1);
        }
    }
}
