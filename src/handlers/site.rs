//! Site page handler: resolves the tenant, builds a `Request` from the
//! query string, form body, multipart uploads and cookies, runs the task
//! sequence, and converts the result back into an HTTP response.

use crate::error::AppError;
use crate::extractors::tenant::SiteKey;
use crate::handler::{self, Request as SiteRequest, RequestHandler, Upload};
use crate::state::AppState;
use axum::{
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Form,
};

type Pairs = Vec<(String, String)>;

/// Fallback handler: every path belongs to the site named by the request.
pub async fn serve_site(
    State(state): State<AppState>,
    site: SiteKey,
    req: Request,
) -> Result<Response, AppError> {
    let key = site.key();
    let request = read_request(&state, req).await?;
    let factory = state.registry.instance(Some(&key)).await?;
    tracing::debug!(tenant = %key, path = request.path_info(), "serving page");
    let page = RequestHandler::new(factory, request).build_page().await;
    Ok(into_http(page))
}

async fn read_request(state: &AppState, req: Request) -> Result<SiteRequest, AppError> {
    let mut out = SiteRequest::new().with_path_info(req.uri().path());
    if let Ok(Query(pairs)) = Query::<Pairs>::try_from_uri(req.uri()) {
        for (k, v) in pairs {
            out.add(&k, &v);
        }
    }
    for cookie in req.headers().get_all(COOKIE) {
        if let Ok(text) = cookie.to_str() {
            out.read_cookie_header(text);
        }
    }

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let filename = field.file_name().map(String::from);
            let field_type = field.content_type().map(String::from);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            match filename {
                Some(filename) => {
                    out.add(&name, &filename);
                    out = out.with_upload(Upload {
                        name,
                        filename: Some(filename),
                        content_type: field_type,
                        bytes: bytes.to_vec(),
                    });
                }
                None => out.add(&name, &String::from_utf8_lossy(&bytes)),
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(pairs) = Form::<Pairs>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        for (k, v) in pairs {
            out.add(&k, &v);
        }
    }
    Ok(out)
}

/// Convert a finished page. Headers that are not valid HTTP are dropped with a warning.
pub fn into_http(page: handler::Response) -> Response {
    let status = StatusCode::from_u16(page.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut res = (status, page.body).into_response();
    let headers = res.headers_mut();
    match HeaderValue::from_str(&page.content_type) {
        Ok(v) => {
            headers.insert(CONTENT_TYPE, v);
        }
        Err(_) => tracing::warn!(content_type = %page.content_type, "invalid content type"),
    }
    for (name, value) in &page.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            (Ok(n), Ok(v)) => {
                headers.append(n, v);
            }
            _ => tracing::warn!(header = %name, "dropping invalid header"),
        }
    }
    for cookie in &page.cookies {
        match HeaderValue::from_str(&cookie.header_value()) {
            Ok(v) => {
                headers.append(SET_COOKIE, v);
            }
            Err(_) => tracing::warn!(cookie = %cookie.name, "dropping invalid cookie"),
        }
    }
    res
}
