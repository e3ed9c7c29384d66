use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use economy_core::types::{AccountId, Principal, Role};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use std::rc::Rc;

/// Claims asserted by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
    pub exp: usize,
}

fn default_role() -> Role {
    Role::Viewer
}

impl Claims {
    pub fn principal(&self) -> Principal {
        Principal {
            account_id: AccountId::new(self.sub.clone()),
            display_name: self.name.clone().unwrap_or_else(|| self.sub.clone()),
            role: self.role,
        }
    }
}

pub struct JwtAuth {
    secret: String,
}

impl JwtAuth {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddleware {
            service: Rc::new(service),
            decoding_key: DecodingKey::from_secret(self.secret.as_bytes()),
        }))
    }
}

pub struct JwtAuthMiddleware<S> {
    service: Rc<S>,
    decoding_key: DecodingKey,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Skip auth for health and metrics endpoints
        if req.path() == "/health" || req.path() == "/metrics" {
            let fut = self.service.call(req);
            return Box::pin(fut);
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
        {
            Some(header) => match header.strip_prefix("Bearer ") {
                Some(token) => token.to_string(),
                None => {
                    return Box::pin(async {
                        Err(actix_web::error::ErrorUnauthorized("Invalid auth header format"))
                    });
                }
            },
            None => {
                return Box::pin(async {
                    Err(actix_web::error::ErrorUnauthorized("Missing Authorization header"))
                });
            }
        };

        match decode::<Claims>(&token, &self.decoding_key, &Validation::new(Algorithm::HS256)) {
            Ok(token_data) => {
                let claims = token_data.claims;
                if let Err(e) = AccountId::new(claims.sub.clone()).validate() {
                    tracing::warn!(error = %e, "JWT subject is not a valid account id");
                    return Box::pin(async {
                        Err(actix_web::error::ErrorUnauthorized("Invalid token subject"))
                    });
                }

                // Handlers read the caller from request extensions
                req.extensions_mut().insert(claims);

                let fut = self.service.call(req);
                Box::pin(fut)
            }
            Err(err) => {
                tracing::warn!("JWT validation failed: {:?}", err);
                Box::pin(async {
                    Err(actix_web::error::ErrorUnauthorized("Invalid or expired token"))
                })
            }
        }
    }
}

/// Authenticated caller, extracted from the claims the middleware stored
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = req
            .extensions()
            .get::<Claims>()
            .map(|claims| AuthenticatedUser(claims.principal()))
            .ok_or_else(|| actix_web::error::ErrorUnauthorized("Authentication required"));
        ready(result)
    }
}
