/// Bearer-token authentication for the HTTP surface. The websocket layer
/// does its own first-frame handshake and does not pass through here.
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, FromRequest, HttpMessage, HttpRequest,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::ops::Deref;
use std::rc::Rc;

use crate::error::AppError;
use crate::models::user::User;
use crate::services::user::UserService;
use crate::state::AppState;
use crate::utils::auth::{extract_bearer_token, verify_jwt};

pub struct AuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            let state = req
                .app_data::<web::Data<AppState>>()
                .cloned()
                .ok_or_else(|| {
                    AppError::InternalServerError("Application state missing".to_string())
                })?;

            let token = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(extract_bearer_token)
                .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

            let claims = verify_jwt(&token, &state.config.jwt_secret)
                .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))?;

            let user = UserService::new(&state.db)
                .get_user_by_id(&claims.sub)
                .await
                .map_err(Error::from)?
                .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

            req.extensions_mut().insert(user);
            service.call(req).await
        })
    }
}

/// Authenticated user extractor. Derefs to the underlying [`User`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl Deref for AuthUser {
    type Target = User;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequest for AuthUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req.extensions().get::<User>().cloned();
        ready(match user {
            Some(user) => Ok(AuthUser(user)),
            None => Err(AppError::Unauthorized("Not authenticated".to_string()).into()),
        })
    }
}
