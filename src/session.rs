//! Cookie-backed sessions.
//!
//! The whole session (current user id plus pending flash messages) lives in a
//! single HS256-signed cookie. A cookie that fails verification is treated as
//! an empty session.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Id;

pub const SESSION_COOKIE: &str = "perch_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Info,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub text: String,
}

/// Claims carried by the session cookie.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flashes: Vec<Flash>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.uid.is_none() && self.flashes.is_empty()
    }
}

/// Signs and verifies session cookies.
#[derive(Clone)]
pub struct SessionKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    secure: bool,
}

impl SessionKey {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            secure: false,
        }
    }

    /// Mark issued cookies `Secure`.
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    fn validation() -> Validation {
        // sessions carry no expiry
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        validation
    }

    pub fn encode(&self, state: &SessionState) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), state, &self.encoding)
    }

    pub fn decode(&self, token: &str) -> Result<SessionState, jsonwebtoken::errors::Error> {
        decode::<SessionState>(token, &self.decoding, &Self::validation()).map(|data| data.claims)
    }

    /// Cookie carrying `state`, or a removal cookie when the state is empty.
    pub fn cookie_for(&self, state: &SessionState) -> Result<Cookie<'static>, jsonwebtoken::errors::Error> {
        if state.is_empty() {
            let mut removal = Cookie::new(SESSION_COOKIE, "");
            removal.set_path("/");
            removal.make_removal();
            return Ok(removal);
        }
        Ok(Cookie::build(SESSION_COOKIE, self.encode(state)?)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .finish())
    }

    fn load(&self, req: &HttpRequest) -> SessionState {
        let Some(cookie) = req.cookie(SESSION_COOKIE) else { return SessionState::default() };
        self.decode(cookie.value()).unwrap_or_else(|e| {
            debug!("discarding unreadable session cookie: {e}");
            SessionState::default()
        })
    }
}

struct SessionInner {
    state: SessionState,
    changed: bool,
}

/// Request-scoped handle on the session. Clones share state.
#[derive(Clone)]
pub struct Session(Rc<RefCell<SessionInner>>);

impl Session {
    fn from_state(state: SessionState) -> Self {
        Self(Rc::new(RefCell::new(SessionInner { state, changed: false })))
    }

    /// The session attached by [`SessionLayer`]; an empty detached one otherwise.
    pub fn get(req: &HttpRequest) -> Self {
        if let Some(session) = req.extensions().get::<Session>() {
            return session.clone();
        }
        let session = Self::from_state(SessionState::default());
        req.extensions_mut().insert(session.clone());
        session
    }

    pub fn user_id(&self) -> Option<Id> {
        self.0.borrow().state.uid
    }

    pub fn log_in(&self, user_id: Id) {
        let mut inner = self.0.borrow_mut();
        inner.state.uid = Some(user_id);
        inner.changed = true;
    }

    /// Forget the current user. Returns whether someone was logged in.
    pub fn log_out(&self) -> bool {
        let mut inner = self.0.borrow_mut();
        let was_logged_in = inner.state.uid.take().is_some();
        inner.changed |= was_logged_in;
        was_logged_in
    }

    pub fn flash(&self, kind: FlashKind, text: impl Into<String>) {
        let mut inner = self.0.borrow_mut();
        inner.state.flashes.push(Flash { kind, text: text.into() });
        inner.changed = true;
    }

    /// Drain pending flashes; they are shown exactly once.
    pub fn take_flashes(&self) -> Vec<Flash> {
        let mut inner = self.0.borrow_mut();
        if inner.state.flashes.is_empty() {
            return Vec::new();
        }
        inner.changed = true;
        std::mem::take(&mut inner.state.flashes)
    }

    fn changed_state(&self) -> Option<SessionState> {
        let inner = self.0.borrow();
        inner.changed.then(|| inner.state.clone())
    }
}

impl FromRequest for Session {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        ready(Ok(Session::get(req)))
    }
}

/// Middleware that loads the session cookie before the handler runs and
/// writes it back afterwards when the handler changed it.
#[derive(Clone)]
pub struct SessionLayer {
    key: Arc<SessionKey>,
}

impl SessionLayer {
    pub fn new(key: SessionKey) -> Self {
        Self { key: Arc::new(key) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionLayer
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SessionMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionMiddleware {
            service: Rc::new(service),
            key: self.key.clone(),
        }))
    }
}

pub struct SessionMiddleware<S> {
    service: Rc<S>,
    key: Arc<SessionKey>,
}

impl<S, B> Service<ServiceRequest> for SessionMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let key = self.key.clone();
        Box::pin(async move {
            let session = Session::from_state(key.load(req.request()));
            req.extensions_mut().insert(session.clone());
            let mut res = svc.call(req).await?;
            if let Some(state) = session.changed_state() {
                let cookie = key
                    .cookie_for(&state)
                    .map_err(actix_web::error::ErrorInternalServerError)?;
                res.response_mut()
                    .add_cookie(&cookie)
                    .map_err(actix_web::error::ErrorInternalServerError)?;
            }
            Ok(res)
        })
    }
}
