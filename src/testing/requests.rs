//! Helpers for driving handlers and reading their responses

use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::http::header;
use actix_web::HttpResponse;

/// The `Set-Cookie` named `name` on a response, if any
#[must_use]
pub fn response_cookie(response: &HttpResponse, name: &str) -> Option<Cookie<'static>> {
    response
        .cookies()
        .find(|cookie| cookie.name() == name)
        .map(Cookie::into_owned)
}

/// The `Set-Cookie` named `name` on a service response, if any
#[must_use]
pub fn service_cookie<B>(response: &ServiceResponse<B>, name: &str) -> Option<Cookie<'static>> {
    response
        .response()
        .cookies()
        .find(|cookie| cookie.name() == name)
        .map(Cookie::into_owned)
}

/// The `Location` header of a service response
#[must_use]
pub fn location<B>(response: &ServiceResponse<B>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

/// A single query parameter of an absolute URL
#[must_use]
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// A response header as a string
#[must_use]
pub fn header_value<B>(response: &ServiceResponse<B>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

/// Whether a cookie instructs the client to drop its copy
#[must_use]
pub fn is_removal(cookie: &Cookie<'_>) -> bool {
    cookie.value().is_empty()
        && cookie
            .max_age()
            .is_some_and(|age| age <= actix_web::cookie::time::Duration::ZERO)
}
