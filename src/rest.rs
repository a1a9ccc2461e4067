//! REST API layer using Axum.
//!
//! One handler per endpoint, each doing at most one store operation or file
//! write. Callers are identified by the `token` session cookie, checked by the
//! [`CurrentUser`] / [`MaybeUser`] extractors before any handler body runs.
//! OpenAPI docs are served at `/swagger-ui`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State},
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap, HeaderValue, Method,
    },
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{info, warn, Level};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    assets::{AssetError, AssetStore},
    auth::{Claims, PasswordHasher, TokenCheck, TokenService},
    config::Config,
    error::{AppError, AppResult, AuthFailure, ErrorBody},
    models::{
        new_id, Booking, BookingInput, BookingView, LinkUploadRequest, LoginRequest, Place,
        PlaceInput, PlaceUpdateRequest, RegisterRequest, User, UserView,
    },
    storage::Storage,
};

pub const SESSION_COOKIE: &str = "token";

/// Most files accepted by one `/upload` request.
pub const MAX_UPLOAD_FILES: usize = 100;

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
pub struct AppState {
    pub storage: Storage,
    pub hasher: PasswordHasher,
    pub tokens: TokenService,
    pub assets: AssetStore,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, storage: Storage) -> Result<Self, AssetError> {
        Ok(Self {
            hasher: PasswordHasher::new(config.bcrypt_cost),
            tokens: TokenService::new(&config.jwt_secret, config.token_ttl),
            assets: AssetStore::new(&config.uploads_dir, config.link_policy.clone())?,
            storage,
            config,
        })
    }
}

// --- Session extractors ---

/// Caller identity from a valid session cookie; rejects with 401 otherwise.
pub struct CurrentUser(pub Claims);

/// Like [`CurrentUser`], but a missing cookie yields `None` instead of 401.
/// A cookie that is present but invalid is still rejected.
pub struct MaybeUser(pub Option<Claims>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match state.tokens.check(session_token(&parts.headers).as_deref()) {
            TokenCheck::Valid(claims) => Ok(CurrentUser(claims)),
            TokenCheck::Missing => Err(AppError::Unauthorized(AuthFailure::Missing)),
            TokenCheck::Expired => Err(AppError::Unauthorized(AuthFailure::Expired)),
            TokenCheck::Invalid => Err(AppError::Unauthorized(AuthFailure::Invalid)),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(CurrentUser(claims)) => Ok(MaybeUser(Some(claims))),
            Err(AppError::Unauthorized(AuthFailure::Missing)) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

/// Value of the `token` cookie, searching every `Cookie` header.
fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
}

fn session_cookie(token: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax"))
        .map_err(|e| AppError::Internal(format!("session cookie: {e}")))
}

fn cleared_session_cookie() -> HeaderValue {
    HeaderValue::from_static("token=; Path=/; HttpOnly; Max-Age=0")
}

// bcrypt is CPU-bound; keep it off the async workers.
async fn hash_password(hasher: &PasswordHasher, password: String) -> AppResult<String> {
    let hasher = hasher.clone();
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task: {e}")))?
        .map_err(AppError::from)
}

async fn verify_password(hasher: &PasswordHasher, password: String, hash: String) -> AppResult<bool> {
    let hasher = hasher.clone();
    tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task: {e}")))?
        .map_err(AppError::from)
}

/// Multipart form accepted by `/upload` (documentation only).
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct PhotoUploadForm {
    #[schema(value_type = Vec<String>, format = Binary)]
    photos: Vec<Vec<u8>>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        test_handler,
        register_handler,
        login_handler,
        profile_handler,
        logout_handler,
        upload_by_link_handler,
        upload_handler,
        create_place_handler,
        user_places_handler,
        get_place_handler,
        update_place_handler,
        all_places_handler,
        create_booking_handler,
        bookings_handler,
    ),
    components(schemas(
        UserView,
        RegisterRequest,
        LoginRequest,
        LinkUploadRequest,
        PlaceInput,
        PlaceUpdateRequest,
        Place,
        BookingInput,
        Booking,
        BookingView,
        PhotoUploadForm,
        ErrorBody,
    )),
    tags((name = "house_app", description = "Rental listings and bookings"))
)]
pub struct ApiDoc;

/// Create Axum router with every endpoint, the `/uploads` static mount,
/// CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);
    let uploads = ServeDir::new(state.assets.dir());
    let upload_limit = DefaultBodyLimit::max(state.config.upload_max_bytes);

    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    Router::new()
        .route("/test", get(test_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/profile", get(profile_handler))
        .route("/logout", post(logout_handler))
        .route("/upload-by-link", post(upload_by_link_handler))
        .route("/upload", post(upload_handler).layer(upload_limit))
        .route(
            "/places",
            post(create_place_handler)
                .get(all_places_handler)
                .put(update_place_handler),
        )
        .route("/places/", put(update_place_handler))
        .route("/places/:id", get(get_place_handler))
        .route("/user-places", get(user_places_handler))
        .route("/bookings", post(create_booking_handler).get(bookings_handler))
        .nest_service("/uploads", uploads)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(trace)
                .layer(cors_layer(&state.config.client_origin)),
        )
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(1800));

    match HeaderValue::from_str(origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!(%origin, error = %e, "invalid CLIENT_ORIGIN, cross-origin requests disabled");
            layer
        }
    }
}

// --- Handlers ---

/// Liveness probe.
#[utoipa::path(get, path = "/test", responses((status = 200, body = String)))]
async fn test_handler() -> Json<&'static str> {
    Json("test ok")
}

#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Created user", body = UserView),
        (status = 422, description = "Rejected by the store, e.g. email taken", body = ErrorBody)
    )
)]
async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<Json<UserView>> {
    let password = hash_password(&state.hasher, payload.password).await?;
    let user = state.storage.create_user(User {
        id: new_id(),
        name: payload.name,
        email: payload.email.trim().to_string(),
        password,
    })?;

    info!(user_id = %user.id, "user registered");
    Ok(Json(user.view()))
}

/// Verify credentials and start a cookie session.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; sets the `token` cookie", body = UserView),
        (status = 404, description = "No account with this email", body = ErrorBody),
        (status = 422, description = "Wrong password", body = ErrorBody)
    )
)]
async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let user = state
        .storage
        .find_user_by_email(&payload.email)?
        .ok_or(AppError::NotFound("user"))?;

    if !verify_password(&state.hasher, payload.password, user.password.clone()).await? {
        warn!(user_id = %user.id, "login rejected: wrong password");
        return Err(AppError::InvalidCredentials);
    }

    let token = state.tokens.sign(&user)?;
    info!(user_id = %user.id, "user logged in");
    Ok(([(SET_COOKIE, session_cookie(&token)?)], Json(user.view())))
}

#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "Current user, or null without a session", body = UserView),
        (status = 401, description = "Session cookie present but invalid", body = ErrorBody)
    )
)]
async fn profile_handler(
    State(state): State<Arc<AppState>>,
    MaybeUser(claims): MaybeUser,
) -> AppResult<Json<Option<UserView>>> {
    let Some(claims) = claims else {
        return Ok(Json(None));
    };

    let user = state
        .storage
        .find_user_by_id(&claims.id)?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(Some(user.view())))
}

/// Clears the session cookie. Tokens are stateless, so nothing is revoked
/// server-side.
#[utoipa::path(post, path = "/logout", responses((status = 200, body = bool)))]
async fn logout_handler() -> impl IntoResponse {
    ([(SET_COOKIE, cleared_session_cookie())], Json(true))
}

#[utoipa::path(
    post,
    path = "/upload-by-link",
    request_body = LinkUploadRequest,
    responses(
        (status = 200, description = "Stored file name", body = String),
        (status = 400, description = "Link refused by policy (scheme, host, non-public address) or too large", body = ErrorBody),
        (status = 502, description = "Remote fetch failed", body = ErrorBody)
    )
)]
async fn upload_by_link_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LinkUploadRequest>,
) -> AppResult<Json<String>> {
    let name = state.assets.download(&payload.link).await?;
    info!(%name, "photo downloaded by link");
    Ok(Json(name))
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = PhotoUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Stored file names, in upload order", body = [String]),
        (status = 400, description = "Unexpected field or too many files", body = ErrorBody),
        (status = 413, description = "Body exceeds UPLOAD_MAX_BYTES", body = ErrorBody)
    )
)]
async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<Vec<String>>> {
    let mut stored: Vec<String> = Vec::new();

    let result = async {
        while let Some(field) = multipart.next_field().await? {
            if !matches!(field.name(), Some("photos") | Some("photos[]")) {
                return Err(AppError::UploadRejected(format!(
                    "unexpected field {:?}",
                    field.name().unwrap_or_default()
                )));
            }
            if stored.len() == MAX_UPLOAD_FILES {
                return Err(AppError::UploadRejected(format!(
                    "at most {MAX_UPLOAD_FILES} files per upload"
                )));
            }
            let original = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            stored.push(state.assets.save_upload(&original, &bytes).await?);
        }
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(e) = result {
        state.assets.discard(&stored).await;
        return Err(e);
    }

    info!(count = stored.len(), "photos uploaded");
    Ok(Json(stored))
}

#[utoipa::path(
    post,
    path = "/places",
    request_body = PlaceInput,
    responses(
        (status = 200, description = "Created place, owned by the caller", body = Place),
        (status = 401, body = ErrorBody),
        (status = 422, body = ErrorBody)
    )
)]
async fn create_place_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Json(payload): Json<PlaceInput>,
) -> AppResult<Json<Place>> {
    let place = state.storage.create_place(Place::new(&claims.id, payload))?;
    info!(place_id = %place.id, owner = %place.owner, "place created");
    Ok(Json(place))
}

#[utoipa::path(
    get,
    path = "/user-places",
    responses((status = 200, body = [Place]), (status = 401, body = ErrorBody))
)]
async fn user_places_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
) -> AppResult<Json<Vec<Place>>> {
    Ok(Json(state.storage.places_by_owner(&claims.id)?))
}

#[utoipa::path(
    get,
    path = "/places/{id}",
    params(("id" = String, Path, description = "Place id")),
    responses((status = 200, description = "The place, or null if unknown", body = Place))
)]
async fn get_place_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Option<Place>>> {
    Ok(Json(state.storage.find_place(&id)?))
}

/// Full-field replace of a place, allowed only for its owner.
#[utoipa::path(
    put,
    path = "/places",
    request_body = PlaceUpdateRequest,
    responses(
        (status = 200, body = String),
        (status = 401, body = ErrorBody),
        (status = 403, description = "Caller does not own the place", body = ErrorBody),
        (status = 404, body = ErrorBody),
        (status = 422, body = ErrorBody)
    )
)]
async fn update_place_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Json(payload): Json<PlaceUpdateRequest>,
) -> AppResult<Json<&'static str>> {
    let mut place = state
        .storage
        .find_place(&payload.id)?
        .ok_or(AppError::NotFound("place"))?;

    if place.owner != claims.id {
        warn!(place_id = %place.id, caller = %claims.id, "update rejected: not the owner");
        return Err(AppError::Forbidden);
    }

    place.apply(payload.fields);
    state.storage.save_place(&place)?;
    info!(place_id = %place.id, "place updated");
    Ok(Json("ok"))
}

#[utoipa::path(get, path = "/places", responses((status = 200, body = [Place])))]
async fn all_places_handler(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Place>>> {
    Ok(Json(state.storage.all_places()?))
}

#[utoipa::path(
    post,
    path = "/bookings",
    request_body = BookingInput,
    responses(
        (status = 200, description = "Created booking, authored by the caller", body = Booking),
        (status = 401, body = ErrorBody),
        (status = 422, body = ErrorBody)
    )
)]
async fn create_booking_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Json(payload): Json<BookingInput>,
) -> AppResult<Json<Booking>> {
    let booking = state.storage.create_booking(Booking::new(&claims.id, payload))?;
    info!(booking_id = %booking.id, place_id = %booking.place, "booking created");
    Ok(Json(booking))
}

#[utoipa::path(
    get,
    path = "/bookings",
    responses(
        (status = 200, description = "Caller's bookings with places expanded", body = [BookingView]),
        (status = 401, body = ErrorBody)
    )
)]
async fn bookings_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
) -> AppResult<Json<Vec<BookingView>>> {
    Ok(Json(state.storage.bookings_with_places(&claims.id)?))
}
