use std::{net::SocketAddr, sync::Arc};

use aide::{
    axum::ApiRouter,
    openapi::{Info, OpenApi},
    OperationOutput,
};
use axum::{
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json, Router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_trim::string_trim;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, instrument};

use crate::{
    auth::{AuthService, Credentials, Enrollment},
    domain::UserSummary,
    pwd::PasswordEncoder,
    store::UserStore,
    SignalListener, CARGO_PKG_NAME,
};

pub struct ApiContext<P: PasswordEncoder, S: UserStore> {
    pub auth: AuthService<P, S>,
}

pub async fn start_api<P: PasswordEncoder + 'static, S: UserStore + 'static>(
    addr: SocketAddr,
    ctx: ApiContext<P, S>,
) -> anyhow::Result<()> {
    let mut sig = SignalListener::new()?;
    debug!("binding tcp listener");
    let tcp = TcpListener::bind(addr).await?;
    info!(%addr, "server started");
    axum::serve(tcp, create_router(ctx))
        .with_graceful_shutdown(async move { sig.recv().await })
        .await?;
    info!("server stopped");
    Ok(())
}

type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("{0}")]
    Auth(
        #[from]
        #[source]
        crate::auth::Error,
    ),
    #[error("wrong credentials")]
    WrongCredentials,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        use crate::auth::Error as AuthError;

        match self {
            Self::Auth(AuthError::EmailTaken) => StatusCode::CONFLICT.into_response(),
            Self::Auth(AuthError::PasswordTooShort(min)) => {
                let resp = PasswordTooShortResponse { min_length: min };
                (StatusCode::BAD_REQUEST, Json(resp)).into_response()
            }
            Self::Auth(AuthError::Validation(err)) => {
                (StatusCode::BAD_REQUEST, Json(err)).into_response()
            }
            Self::WrongCredentials => StatusCode::UNAUTHORIZED.into_response(),
            err => {
                error!("{err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl OperationOutput for Error {
    type Inner = ();

    fn inferred_responses(
        _ctx: &mut aide::gen::GenContext,
        _operation: &mut aide::openapi::Operation,
    ) -> Vec<(Option<u16>, aide::openapi::Response)> {
        vec![(
            Some(500),
            aide::openapi::Response {
                description: "An unexpected error occurred".into(),
                ..Default::default()
            },
        )]
    }

    fn operation_response(
        _ctx: &mut aide::gen::GenContext,
        _operation: &mut aide::openapi::Operation,
    ) -> Option<aide::openapi::Response> {
        Some(aide::openapi::Response::default())
    }
}

#[derive(Clone, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    /// Email.
    #[serde(deserialize_with = "string_trim")]
    email: String,
    /// New password.
    new_password: String,
    /// Current password.
    password: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordTooShortResponse {
    /// Minimum number of characters.
    min_length: usize,
}

fn create_router<P: PasswordEncoder + 'static, S: UserStore + 'static>(
    ctx: ApiContext<P, S>,
) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
        let path = req
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str)
            .unwrap_or_default();
        let span = info_span!(
            "http_request",
            http.method = %req.method(),
            http.path = path,
        );
        debug!(parent: &span, "http request received");
        span
    });
    let mut api = OpenApi {
        info: Info {
            title: CARGO_PKG_NAME.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            ..Default::default()
        },
        ..Default::default()
    };
    ApiRouter::new()
        .api_route("/_health", aide::axum::routing::get(health))
        .api_route(
            "/auth",
            aide::axum::routing::post(authenticate_with_password),
        )
        .api_route("/user", aide::axum::routing::post(enroll))
        .api_route("/user/password", aide::axum::routing::put(change_password))
        .route("/_doc", axum::routing::get(doc))
        .finish_api(&mut api)
        .with_state(Arc::new(ctx))
        .layer(trace_layer)
        .layer(Extension(api))
}

async fn authenticate_with_password<P: PasswordEncoder + 'static, S: UserStore>(
    State(ctx): State<Arc<ApiContext<P, S>>>,
    Json(req): Json<Credentials>,
) -> Result<(StatusCode, Json<UserSummary>)> {
    let user = ctx
        .auth
        .authenticate(&req)
        .await?
        .ok_or(Error::WrongCredentials)?;
    Ok((StatusCode::OK, Json(user.summary())))
}

async fn change_password<P: PasswordEncoder + 'static, S: UserStore>(
    State(ctx): State<Arc<ApiContext<P, S>>>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode> {
    let creds = Credentials {
        email: req.email,
        password: req.password,
    };
    if ctx.auth.change_password(&creds, &req.new_password).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::WrongCredentials)
    }
}

#[instrument(skip(api))]
async fn doc(Extension(api): Extension<OpenApi>) -> Json<OpenApi> {
    Json(api)
}

async fn enroll<P: PasswordEncoder + 'static, S: UserStore>(
    State(ctx): State<Arc<ApiContext<P, S>>>,
    Json(req): Json<Enrollment>,
) -> Result<(StatusCode, Json<UserSummary>)> {
    let user = ctx.auth.enroll(&req).await?;
    Ok((StatusCode::CREATED, Json(user.summary())))
}

#[instrument(skip_all)]
async fn health<P: PasswordEncoder, S: UserStore>(_: State<Arc<ApiContext<P, S>>>) -> StatusCode {
    StatusCode::NO_CONTENT
}

// Tests
