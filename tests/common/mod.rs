#![allow(dead_code)]

use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::http::header;
use perch::auth::hash_password;
use perch::models::{NewUser, User};
use perch::repo::{inmem::InMemRepo, UserRepo};
use perch::session::{SessionKey, SessionState, SESSION_COOKIE};

pub const SECRET: &str = "test-secret-must-be-32-bytes-long!!";
pub const PASSWORD: &str = "password1";

pub fn key() -> SessionKey {
    SessionKey::new(SECRET)
}

/// Build an app over a repo (moved in; pass a clone to keep a handle),
/// or over a prepared `AppState` with `state: ...`.
#[macro_export]
macro_rules! test_app {
    (state: $state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($state))
                .wrap(perch::SessionLayer::new(common::key()))
                .configure(perch::config),
        )
        .await
    };
    ($repo:expr) => {
        $crate::test_app!(state: perch::AppState::new(std::sync::Arc::new($repo)))
    };
}

pub fn login_cookie(uid: i64) -> Cookie<'static> {
    key().cookie_for(&SessionState { uid: Some(uid), flashes: vec![] }).unwrap()
}

pub fn session_cookie<B>(resp: &ServiceResponse<B>) -> Option<Cookie<'static>> {
    resp.response()
        .cookies()
        .find(|c| c.name() == SESSION_COOKIE)
        .map(|c| c.into_owned())
}

/// Session as written back by the response; empty when untouched or cleared.
pub fn session_after<B>(resp: &ServiceResponse<B>) -> SessionState {
    session_cookie(resp)
        .and_then(|c| key().decode(c.value()).ok())
        .unwrap_or_default()
}

pub fn flash_texts<B>(resp: &ServiceResponse<B>) -> Vec<String> {
    session_after(resp).flashes.into_iter().map(|f| f.text).collect()
}

pub fn location<B>(resp: &ServiceResponse<B>) -> String {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn seed_user(repo: &InMemRepo, name: &str) -> User {
    repo.create_user(NewUser {
        username: name.into(),
        email: format!("{name}@example.com"),
        password_hash: hash_password(PASSWORD).unwrap(),
        image_url: None,
    })
    .await
    .unwrap()
}
