use anyhow::Result;
use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use tower_http::services::ServeDir;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{response, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::session::Session;
use super::{log_requests, state::*, RequestsLoggingLevel, ServerConfig};
use crate::catalog_store::{CatalogStore, SongFields};
use crate::error::ApiError;
use crate::user::{AuthTokenValue, User, UserManager, UserStore};

#[derive(Deserialize, Debug)]
struct SignupBody {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Deserialize, Debug)]
struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: User,
}

#[derive(Deserialize, Debug)]
struct AccountBody {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Deserialize, Debug)]
struct PasswordBody {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize, Debug)]
struct SubscriptionBody {
    pub subscribe: bool,
}

#[derive(Deserialize, Debug)]
struct PlaylistBody {
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Deserialize, Debug)]
struct PlaylistSongsBody {
    pub song_ids: Vec<i64>,
}

#[derive(Deserialize, Debug)]
struct NameBody {
    pub name: String,
}

#[derive(Deserialize, Debug)]
struct ArtistBody {
    pub name: String,
    pub country_id: i64,
}

#[derive(Deserialize, Debug)]
struct AlbumBody {
    pub title: String,
    pub release_date: Option<String>,
    #[serde(default)]
    pub artist_ids: Vec<i64>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
}

#[derive(Deserialize, Debug)]
struct SongBody {
    #[serde(flatten)]
    pub fields: SongFields,
    pub album_id: Option<i64>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
}

#[derive(Deserialize, Debug, Default)]
struct SearchQuery {
    pub q: Option<String>,
}

fn session_cookie_response(status: StatusCode, token: &str, body: String) -> Response {
    let cookie_value = match HeaderValue::from_str(&format!(
        "session_token={}; Path=/; HttpOnly",
        token
    )) {
        Ok(value) => value,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    response::Builder::new()
        .status(status)
        .header(axum::http::header::SET_COOKIE, cookie_value)
        .header(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// Auth

async fn signup(
    State(user_manager): State<GuardedUserManager>,
    Json(body): Json<SignupBody>,
) -> Result<Response, ApiError> {
    let (user, token) = user_manager.register(
        &body.username,
        &body.password,
        &body.first_name,
        &body.last_name,
    )?;
    let response_body = serde_json::to_string(&AuthResponse {
        token: token.value.0.clone(),
        user,
    })
    .map_err(anyhow::Error::from)?;
    Ok(session_cookie_response(
        StatusCode::CREATED,
        &token.value.0,
        response_body,
    ))
}

async fn login(
    State(user_manager): State<GuardedUserManager>,
    Json(body): Json<LoginBody>,
) -> Result<Response, ApiError> {
    let (user, token) = user_manager.login(&body.username, &body.password)?;
    let response_body = serde_json::to_string(&AuthResponse {
        token: token.value.0.clone(),
        user,
    })
    .map_err(anyhow::Error::from)?;
    Ok(session_cookie_response(
        StatusCode::OK,
        &token.value.0,
        response_body,
    ))
}

async fn logout(
    State(user_manager): State<GuardedUserManager>,
    session: Session,
) -> Result<Response, ApiError> {
    user_manager.logout(&AuthTokenValue(session.token))?;
    let cookie_value = Cookie::build(Cookie::new("session_token", ""))
        .path("/")
        .expires(time::OffsetDateTime::now_utc() - time::Duration::days(1)) // Expire it in the past
        .same_site(SameSite::Lax)
        .build();
    Ok(response::Builder::new()
        .status(StatusCode::OK)
        .header(axum::http::header::SET_COOKIE, cookie_value.to_string())
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

// Account

async fn get_account(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
) -> Result<Response, ApiError> {
    Ok(Json(user_manager.get_user(session.user_id)?).into_response())
}

async fn put_account(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Json(body): Json<AccountBody>,
) -> Result<Response, ApiError> {
    let user = user_manager.update_account(
        session.user_id,
        &body.username,
        &body.first_name,
        &body.last_name,
    )?;
    Ok(Json(user).into_response())
}

async fn put_password(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Json(body): Json<PasswordBody>,
) -> Result<Response, ApiError> {
    user_manager.update_password(session.user_id, &body.current_password, &body.new_password)?;
    Ok(StatusCode::OK.into_response())
}

// Users and follows

async fn get_users(
    _session: Session,
    State(user_manager): State<GuardedUserManager>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    Ok(Json(user_manager.get_users(query.q.as_deref())?).into_response())
}

async fn get_user(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(user_manager.get_user_details(session.user_id, id)?).into_response())
}

async fn put_follow(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    user_manager.follow(session.user_id, id)?;
    Ok(StatusCode::OK.into_response())
}

async fn delete_follow(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    user_manager.unfollow(session.user_id, id)?;
    Ok(StatusCode::OK.into_response())
}

async fn get_followers(
    _session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(user_manager.get_followers(id)?).into_response())
}

async fn get_following(
    _session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(user_manager.get_following(id)?).into_response())
}

// Subscription

async fn get_subscription(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
) -> Result<Response, ApiError> {
    Ok(Json(user_manager.subscription_status(session.user_id)?).into_response())
}

async fn put_subscription(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Json(body): Json<SubscriptionBody>,
) -> Result<Response, ApiError> {
    let status = user_manager.update_subscription(session.user_id, body.subscribe)?;
    Ok(Json(status).into_response())
}

async fn post_remaining_playcount(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
) -> Result<Response, ApiError> {
    let remaining = user_manager.decrement_playcount(session.user_id)?;
    Ok(Json(remaining).into_response())
}

// Playlists

async fn get_playlists(
    _session: Session,
    State(user_manager): State<GuardedUserManager>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    Ok(Json(user_manager.get_public_playlists(query.q.as_deref())?).into_response())
}

async fn post_playlist(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Json(body): Json<PlaylistBody>,
) -> Result<Response, ApiError> {
    let playlist = user_manager.create_playlist(session.user_id, &body.name, body.is_public)?;
    Ok((StatusCode::CREATED, Json(playlist)).into_response())
}

async fn get_playlist(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(user_manager.get_playlist_details(session.user_id, id)?).into_response())
}

async fn put_playlist(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
    Json(body): Json<PlaylistBody>,
) -> Result<Response, ApiError> {
    let playlist =
        user_manager.update_playlist(session.user_id, id, &body.name, body.is_public)?;
    Ok(Json(playlist).into_response())
}

async fn delete_playlist(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    user_manager.delete_playlist(session.user_id, id)?;
    Ok(StatusCode::OK.into_response())
}

async fn put_playlist_songs(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path(id): Path<i64>,
    Json(body): Json<PlaylistSongsBody>,
) -> Result<Response, ApiError> {
    let update = user_manager.add_songs_to_playlist(session.user_id, id, &body.song_ids)?;
    Ok(Json(update).into_response())
}

async fn delete_playlist_song(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
    Path((id, song_id)): Path<(i64, i64)>,
) -> Result<Response, ApiError> {
    user_manager.remove_song_from_playlist(session.user_id, id, song_id)?;
    Ok(StatusCode::OK.into_response())
}

// Countries

async fn post_country(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Json(body): Json<NameBody>,
) -> Result<Response, ApiError> {
    Ok((StatusCode::CREATED, Json(catalog_store.create_country(&body.name)?)).into_response())
}

async fn get_country(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_country(id)?).into_response())
}

async fn get_countries(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_countries(query.q.as_deref())?).into_response())
}

async fn put_country(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<NameBody>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.update_country(id, &body.name)?).into_response())
}

async fn delete_country(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    catalog_store.delete_country(id)?;
    Ok(StatusCode::OK.into_response())
}

// Artists

async fn post_artist(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Json(body): Json<ArtistBody>,
) -> Result<Response, ApiError> {
    let artist = catalog_store.create_artist(&body.name, body.country_id)?;
    Ok((StatusCode::CREATED, Json(artist)).into_response())
}

async fn get_artist(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_artist(id)?).into_response())
}

async fn get_artists(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_artists(query.q.as_deref())?).into_response())
}

async fn put_artist(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<ArtistBody>,
) -> Result<Response, ApiError> {
    let artist = catalog_store.update_artist(id, &body.name, body.country_id)?;
    Ok(Json(artist).into_response())
}

async fn delete_artist(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    catalog_store.delete_artist(id)?;
    Ok(StatusCode::OK.into_response())
}

// Genres

async fn post_genre(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Json(body): Json<NameBody>,
) -> Result<Response, ApiError> {
    Ok((StatusCode::CREATED, Json(catalog_store.create_genre(&body.name)?)).into_response())
}

async fn get_genre(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_genre(id)?).into_response())
}

async fn get_genres(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_genres(query.q.as_deref())?).into_response())
}

async fn put_genre(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<NameBody>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.update_genre(id, &body.name)?).into_response())
}

async fn delete_genre(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    catalog_store.delete_genre(id)?;
    Ok(StatusCode::OK.into_response())
}

// Albums

async fn post_album(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Json(body): Json<AlbumBody>,
) -> Result<Response, ApiError> {
    let album = catalog_store.create_album(
        &body.title,
        body.release_date.as_deref(),
        &body.artist_ids,
        &body.genre_ids,
    )?;
    Ok((StatusCode::CREATED, Json(album)).into_response())
}

async fn get_album(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_album(id)?).into_response())
}

async fn get_albums(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_albums(query.q.as_deref())?).into_response())
}

async fn put_album(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<AlbumBody>,
) -> Result<Response, ApiError> {
    let album = catalog_store.update_album(
        id,
        &body.title,
        body.release_date.as_deref(),
        &body.artist_ids,
        &body.genre_ids,
    )?;
    Ok(Json(album).into_response())
}

async fn delete_album(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    catalog_store.delete_album(id)?;
    Ok(StatusCode::OK.into_response())
}

// Songs

async fn post_song(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Json(body): Json<SongBody>,
) -> Result<Response, ApiError> {
    let song = catalog_store.create_song(&body.fields, body.album_id, &body.genre_ids)?;
    Ok((StatusCode::CREATED, Json(song)).into_response())
}

async fn get_song(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_song(id)?).into_response())
}

async fn get_songs(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    Ok(Json(catalog_store.get_songs(query.q.as_deref())?).into_response())
}

async fn put_song(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<SongBody>,
) -> Result<Response, ApiError> {
    let song = catalog_store.update_song(id, &body.fields, body.album_id, &body.genre_ids)?;
    Ok(Json(song).into_response())
}

async fn delete_song(
    _session: Session,
    State(catalog_store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    catalog_store.delete_song(id)?;
    Ok(StatusCode::OK.into_response())
}

pub fn make_app(
    config: ServerConfig,
    catalog_store: Arc<dyn CatalogStore>,
    user_store: Arc<dyn UserStore>,
) -> Result<Router> {
    let user_manager = Arc::new(UserManager::new(user_store, catalog_store.clone()));
    let state = ServerState {
        config: config.clone(),
        catalog_store,
        user_manager,
    };

    let auth_routes: Router = Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .with_state(state.clone());

    let user_routes: Router = Router::new()
        .route("/account", get(get_account))
        .route("/account", put(put_account))
        .route("/account/password", put(put_password))
        .route("/users", get(get_users))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/follow", put(put_follow))
        .route("/users/{id}/follow", delete(delete_follow))
        .route("/users/{id}/followers", get(get_followers))
        .route("/users/{id}/following", get(get_following))
        .route("/subscription", get(get_subscription))
        .route("/subscription", put(put_subscription))
        .route("/remaining_playcount", post(post_remaining_playcount))
        .route("/playlists", get(get_playlists))
        .route("/playlists", post(post_playlist))
        .route("/playlists/{id}", get(get_playlist))
        .route("/playlists/{id}", put(put_playlist))
        .route("/playlists/{id}", delete(delete_playlist))
        .route("/playlists/{id}/songs", put(put_playlist_songs))
        .route(
            "/playlists/{id}/songs/{song_id}",
            delete(delete_playlist_song),
        )
        .with_state(state.clone());

    let catalog_routes: Router = Router::new()
        .route("/countries", get(get_countries))
        .route("/countries", post(post_country))
        .route("/countries/{id}", get(get_country))
        .route("/countries/{id}", put(put_country))
        .route("/countries/{id}", delete(delete_country))
        .route("/artists", get(get_artists))
        .route("/artists", post(post_artist))
        .route("/artists/{id}", get(get_artist))
        .route("/artists/{id}", put(put_artist))
        .route("/artists/{id}", delete(delete_artist))
        .route("/genres", get(get_genres))
        .route("/genres", post(post_genre))
        .route("/genres/{id}", get(get_genre))
        .route("/genres/{id}", put(put_genre))
        .route("/genres/{id}", delete(delete_genre))
        .route("/albums", get(get_albums))
        .route("/albums", post(post_album))
        .route("/albums/{id}", get(get_album))
        .route("/albums/{id}", put(put_album))
        .route("/albums/{id}", delete(delete_album))
        .route("/songs", get(get_songs))
        .route("/songs", post(post_song))
        .route("/songs/{id}", get(get_song))
        .route("/songs/{id}", put(put_song))
        .route("/songs/{id}", delete(delete_song))
        .with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new(),
    };

    let api_routes = auth_routes.merge(user_routes).merge(catalog_routes);
    let mut app: Router = home_router.nest("/api", api_routes);

    app = app.layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

pub async fn run_server(
    catalog_store: Arc<dyn CatalogStore>,
    user_store: Arc<dyn UserStore>,
    requests_logging_level: RequestsLoggingLevel,
    port: u16,
    frontend_dir_path: Option<String>,
) -> Result<()> {
    let config = ServerConfig {
        port,
        requests_logging_level,
        frontend_dir_path,
    };
    let app = make_app(config, catalog_store, user_store)?;

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    Ok(axum::serve(listener, app).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::SqliteCatalogStore;
    use crate::user::SqliteUserStore;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn make_test_app(tmp: &tempfile::TempDir) -> Router {
        let catalog_store =
            Arc::new(SqliteCatalogStore::new(tmp.path().join("catalog.db")).unwrap());
        let user_store = Arc::new(SqliteUserStore::new(tmp.path().join("user.db")).unwrap());
        make_app(ServerConfig::default(), catalog_store, user_store).unwrap()
    }

    #[tokio::test]
    async fn responds_forbidden_on_protected_routes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let app = make_test_app(&tmp);

        let protected_routes = vec![
            "/api/account",
            "/api/users",
            "/api/users/1",
            "/api/users/1/followers",
            "/api/subscription",
            "/api/playlists",
            "/api/countries",
            "/api/artists/1",
            "/api/genres",
            "/api/albums/1",
            "/api/songs",
        ];

        for route in protected_routes.into_iter() {
            println!("Trying route {}", route);
            let request = Request::builder().uri(route).body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn signup_sets_session_cookie() {
        let tmp = tempfile::TempDir::new().unwrap();
        let app = make_test_app(&tmp);

        let request = Request::builder()
            .method("POST")
            .uri("/api/signup")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"username":"ada","password":"hunter22","first_name":"Ada","last_name":"L"}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let cookie = response
            .headers()
            .get(axum::http::header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie.starts_with("session_token="));
    }
}
