use std::future::{ready, Ready};
use std::rc::Rc;

use actix_web::body::EitherBody;
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, Error, FromRequest, HttpMessage, HttpRequest};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use futures_util::future::LocalBoxFuture;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{Id, User};
use crate::repo::{Repo, RepoError, RepoResult};
use crate::routes::{redirect, AppState};
use crate::session::{FlashKind, Session};

/// Hash a password with Argon2id and a fresh random salt (PHC string).
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else { return false };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// Look the user up by name and check the password. Unknown usernames and
/// wrong passwords are indistinguishable to the caller.
pub async fn authenticate(repo: &dyn Repo, username: &str, password: &str) -> RepoResult<Option<User>> {
    let Some(user) = repo.find_user_by_username(username).await? else { return Ok(None) };
    Ok(verify_password(password, &user.password_hash).then_some(user))
}

/// Replace the stored hash when `current` matches. Returns whether it did.
pub async fn change_password(repo: &dyn Repo, user: &User, current: &str, new: &str) -> RepoResult<bool> {
    if !verify_password(current, &user.password_hash) {
        return Ok(false);
    }
    let hash = hash_password(new).map_err(|e| RepoError::Internal(e.to_string()))?;
    repo.set_password_hash(user.id, hash).await?;
    Ok(true)
}

/// Named situations a login guard protects; each carries its own notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardContext {
    Logout,
    UserDetails,
}

impl GuardContext {
    pub fn message(self) -> &'static str {
        match self {
            GuardContext::Logout => "You aren't currently logged in",
            GuardContext::UserDetails => "Access unauthorized.",
        }
    }

    pub fn kind(self) -> FlashKind {
        match self {
            GuardContext::Logout => FlashKind::Info,
            GuardContext::UserDetails => FlashKind::Danger,
        }
    }
}

/// The logged-in user for this request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> Id {
        self.0.id
    }
}

/// Resolve the session's user id to a record, caching it on the request.
/// A session pointing at a deleted account is logged out.
pub async fn resolve_user(req: HttpRequest) -> Result<Option<User>, ApiError> {
    if let Some(CurrentUser(user)) = req.extensions().get::<CurrentUser>() {
        return Ok(Some(user.clone()));
    }
    let session = Session::get(&req);
    let Some(uid) = session.user_id() else { return Ok(None) };
    let state = req.app_data::<web::Data<AppState>>().cloned().ok_or(ApiError::Internal)?;
    match state.repo.get_user(uid).await {
        Ok(user) => {
            req.extensions_mut().insert(CurrentUser(user.clone()));
            Ok(Some(user))
        }
        Err(RepoError::NotFound) => {
            debug!(uid, "session refers to a missing user; logging out");
            session.log_out();
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl FromRequest for CurrentUser {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            match resolve_user(req).await? {
                Some(user) => Ok(CurrentUser(user)),
                None => Err(ApiError::Unauthorized.into()),
            }
        })
    }
}

/// Guard composed onto resources that need a logged-in user. Anonymous
/// requests are redirected to `/login` with the context's notice.
#[derive(Clone, Copy)]
pub struct RequireLogin {
    context: GuardContext,
}

impl RequireLogin {
    pub fn new(context: GuardContext) -> Self {
        Self { context }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireLogin
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireLoginMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireLoginMiddleware {
            service: Rc::new(service),
            context: self.context,
        }))
    }
}

pub struct RequireLoginMiddleware<S> {
    service: Rc<S>,
    context: GuardContext,
}

impl<S, B> Service<ServiceRequest> for RequireLoginMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
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
        let context = self.context;
        Box::pin(async move {
            if resolve_user(req.request().clone()).await?.is_some() {
                return svc.call(req).await.map(ServiceResponse::map_into_left_body);
            }
            Session::get(req.request()).flash(context.kind(), context.message());
            Ok(req.into_response(redirect("/login")).map_into_right_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_only_the_hashed_password() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn guard_contexts_have_distinct_notices() {
        assert_ne!(GuardContext::Logout.message(), GuardContext::UserDetails.message());
        assert_eq!(GuardContext::UserDetails.kind(), FlashKind::Danger);
    }
}
