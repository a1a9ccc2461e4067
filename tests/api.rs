use std::path::Path;

use house_app::{
    config::{Config, LinkPolicy},
    rest::{create_router, AppState},
    storage::Storage,
};
use reqwest::{header, multipart, StatusCode};
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with the default test config adjusted by `tweak`.
    async fn spawn_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(dir.path());
        tweak(&mut config);
        let storage = Storage::open(&config.database_path).expect("open storage");
        // Same router as prod, bound to an ephemeral port.
        let app = create_router(AppState::new(config, storage).expect("app state"));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle, _dir: dir }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn test_config(dir: &Path) -> Config {
    Config {
        database_path: dir.join("db"),
        jwt_secret: "test-secret".to_string(),
        port: 0,
        uploads_dir: dir.join("uploads"),
        client_origin: "http://127.0.0.1:5173".to_string(),
        bcrypt_cost: 4,
        token_ttl: None,
        link_policy: LinkPolicy::default(),
        upload_max_bytes: 1024 * 1024,
        log_dir: None,
    }
}

/// A client with its own cookie jar, i.e. one browser session.
fn session() -> reqwest::Client {
    reqwest::Client::builder().cookie_store(true).build().unwrap()
}

async fn register(srv: &TestServer, client: &reqwest::Client, name: &str, email: &str, password: &str) -> Value {
    let res = client
        .post(srv.url("/register"))
        .json(&json!({ "name": name, "email": email, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

async fn login(srv: &TestServer, client: &reqwest::Client, email: &str, password: &str) -> reqwest::Response {
    client
        .post(srv.url("/login"))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .unwrap()
}

/// Registers and logs in, returning the session client and the user id.
async fn signed_in(srv: &TestServer, name: &str, email: &str, password: &str) -> (reqwest::Client, String) {
    let client = session();
    let user = register(srv, &client, name, email, password).await;
    let res = login(srv, &client, email, password).await;
    assert_eq!(res.status(), StatusCode::OK);
    (client, user["id"].as_str().unwrap().to_string())
}

fn loft() -> Value {
    json!({
        "title": "Loft",
        "address": "1 Main St",
        "addedPhotos": ["a.jpg"],
        "description": "Bright loft",
        "perks": ["wifi", "tv", "wifi"],
        "extraInfo": "No parties",
        "checkIn": "14",
        "checkOut": "11",
        "maxGuests": 2,
        "price": 100
    })
}

async fn create_place(srv: &TestServer, client: &reqwest::Client, body: &Value) -> Value {
    let res = client.post(srv.url("/places")).json(body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

async fn error_code(res: reqwest::Response) -> String {
    let body: Value = res.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn health_check_answers() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/test")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!("test ok"));
}

#[tokio::test]
async fn host_and_guest_end_to_end() {
    let srv = TestServer::spawn().await;
    let (ann, ann_id) = signed_in(&srv, "Ann", "ann@x.com", "pw1").await;

    let profile: Value = ann.get(srv.url("/profile")).send().await.unwrap().json().await.unwrap();
    assert_eq!(profile["email"], "ann@x.com");
    assert!(profile.get("password").is_none());

    let place = create_place(&srv, &ann, &loft()).await;
    let place_id = place["id"].as_str().unwrap().to_string();
    assert_eq!(place["owner"], ann_id.as_str());
    assert_eq!(place["photos"], json!(["a.jpg"]));
    assert_eq!(place["perks"], json!(["tv", "wifi"]));

    let mine: Value = ann.get(srv.url("/user-places")).send().await.unwrap().json().await.unwrap();
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (bob, bob_id) = signed_in(&srv, "Bob", "bob@x.com", "pw2").await;
    let res = bob
        .post(srv.url("/bookings"))
        .json(&json!({
            "place": place_id,
            "checkIn": "2024-05-01",
            "checkOut": "2024-05-03",
            "numberOfGuests": 2,
            "name": "Bob",
            "phone": "555",
            "price": 200
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let booking: Value = res.json().await.unwrap();
    assert_eq!(booking["user"], bob_id.as_str());
    assert_eq!(booking["place"], place_id.as_str());

    let bookings: Value = bob.get(srv.url("/bookings")).send().await.unwrap().json().await.unwrap();
    let bookings = bookings.as_array().unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0]["place"]["title"], "Loft");
    assert_eq!(bookings[0]["place"]["id"], place_id.as_str());

    // Anonymous reads
    let anon = reqwest::Client::new();
    let all: Value = anon.get(srv.url("/places")).send().await.unwrap().json().await.unwrap();
    assert_eq!(all.as_array().unwrap().len(), 1);
    let one: Value = anon
        .get(srv.url(&format!("/places/{place_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(one["title"], "Loft");
}

#[tokio::test]
async fn wrong_password_sets_no_cookie() {
    let srv = TestServer::spawn().await;
    let client = session();
    register(&srv, &client, "Ann", "ann@x.com", "pw1").await;

    let res = login(&srv, &client, "ann@x.com", "nope").await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(res.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(error_code(res).await, "password_incorrect");

    let profile: Value = client.get(srv.url("/profile")).send().await.unwrap().json().await.unwrap();
    assert!(profile.is_null());
}

#[tokio::test]
async fn unknown_email_is_not_found() {
    let srv = TestServer::spawn().await;
    let res = login(&srv, &session(), "ghost@x.com", "pw").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(res.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = session();
    register(&srv, &client, "Ann", "ann@x.com", "pw1").await;

    let res = client
        .post(srv.url("/register"))
        .json(&json!({ "name": "Imposter", "email": "ANN@x.com", "password": "pw9" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(res).await, "validation_error");

    // The original account still logs in with its own password.
    let res = login(&srv, &client, "ann@x.com", "pw1").await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn only_owner_can_update_place() {
    let srv = TestServer::spawn().await;
    let (ann, _) = signed_in(&srv, "Ann", "ann@x.com", "pw1").await;
    let (bob, _) = signed_in(&srv, "Bob", "bob@x.com", "pw2").await;
    let place = create_place(&srv, &ann, &loft()).await;
    let place_id = place["id"].as_str().unwrap();
    let place_url = srv.url(&format!("/places/{place_id}"));
    let before = reqwest::get(&place_url).await.unwrap().bytes().await.unwrap();

    let update = json!({
        "id": place_id,
        "title": "Hijacked",
        "address": "elsewhere",
        "addedPhotos": ["evil.jpg"],
        "description": "",
        "perks": ["pets"],
        "extraInfo": "",
        "checkIn": "1",
        "checkOut": "2",
        "maxGuests": 9,
        "price": 1
    });
    let res = bob.put(srv.url("/places")).json(&update).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "forbidden");

    let after = reqwest::get(&place_url).await.unwrap().bytes().await.unwrap();
    assert_eq!(before, after);
    let after: Value = serde_json::from_slice(&after).unwrap();
    assert_eq!(after, place);

    let mut update = update;
    update["title"] = json!("Penthouse");
    update["maxGuests"] = json!(2);
    update["price"] = json!(150);
    let res = ann.put(srv.url("/places/")).json(&update).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!("ok"));

    let updated: Value = reqwest::get(srv.url(&format!("/places/{place_id}")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["title"], "Penthouse");
    assert_eq!(updated["price"], json!(150.0));
    assert_eq!(updated["owner"], place["owner"]);
}

#[tokio::test]
async fn updating_unknown_place_is_not_found() {
    let srv = TestServer::spawn().await;
    let (ann, _) = signed_in(&srv, "Ann", "ann@x.com", "pw1").await;

    let mut update = loft();
    update["id"] = json!("no-such-place");
    let res = ann.put(srv.url("/places")).json(&update).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn booking_author_comes_from_session() {
    let srv = TestServer::spawn().await;
    let (ann, ann_id) = signed_in(&srv, "Ann", "ann@x.com", "pw1").await;
    let (bob, bob_id) = signed_in(&srv, "Bob", "bob@x.com", "pw2").await;
    let place = create_place(&srv, &ann, &loft()).await;

    let res = bob
        .post(srv.url("/bookings"))
        .json(&json!({
            "place": place["id"],
            "user": ann_id,
            "checkIn": "2024-06-01",
            "checkOut": "2024-06-02",
            "numberOfGuests": 1,
            "name": "Bob",
            "phone": "555",
            "price": 100
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let booking: Value = res.json().await.unwrap();
    assert_eq!(booking["user"], bob_id.as_str());

    let anns: Value = ann.get(srv.url("/bookings")).send().await.unwrap().json().await.unwrap();
    assert!(anns.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn user_places_lists_only_own_places() {
    let srv = TestServer::spawn().await;
    let (ann, ann_id) = signed_in(&srv, "Ann", "ann@x.com", "pw1").await;
    let (bob, _) = signed_in(&srv, "Bob", "bob@x.com", "pw2").await;

    create_place(&srv, &ann, &loft()).await;
    let mut cabin = loft();
    cabin["title"] = json!("Cabin");
    create_place(&srv, &ann, &cabin).await;
    create_place(&srv, &bob, &loft()).await;

    let mine: Value = ann.get(srv.url("/user-places")).send().await.unwrap().json().await.unwrap();
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|p| p["owner"] == ann_id.as_str()));

    let all: Value = reqwest::get(srv.url("/places")).await.unwrap().json().await.unwrap();
    assert_eq!(all.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn invalid_place_is_rejected() {
    let srv = TestServer::spawn().await;
    let (ann, _) = signed_in(&srv, "Ann", "ann@x.com", "pw1").await;

    let mut bad = loft();
    bad["maxGuests"] = json!(0);
    let res = ann.post(srv.url("/places")).json(&bad).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(res).await, "validation_error");
}

#[tokio::test]
async fn protected_endpoints_need_a_valid_session() {
    let srv = TestServer::spawn().await;
    let anon = reqwest::Client::new();

    for path in ["/user-places", "/bookings"] {
        let res = anon.get(srv.url(path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(error_code(res).await, "missing_token");
    }
    let res = anon.post(srv.url("/places")).json(&loft()).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = anon
        .get(srv.url("/user-places"))
        .header(header::COOKIE, "token=not.a.jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "invalid_token");

    let res = anon
        .get(srv.url("/profile"))
        .header(header::COOKIE, "token=not.a.jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_is_null_without_session() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/profile")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body.is_null());
}

#[tokio::test]
async fn logout_clears_the_session() {
    let srv = TestServer::spawn().await;
    let (ann, _) = signed_in(&srv, "Ann", "ann@x.com", "pw1").await;

    let res = ann.post(srv.url("/logout")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = res.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(cookie.starts_with("token=;"));
    assert!(cookie.contains("Max-Age=0"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!(true));

    let profile: Value = ann.get(srv.url("/profile")).send().await.unwrap().json().await.unwrap();
    assert!(profile.is_null());
}

#[tokio::test]
async fn uploaded_photos_are_served() {
    let srv = TestServer::spawn().await;
    let form = multipart::Form::new()
        .part("photos", multipart::Part::bytes(b"first".to_vec()).file_name("one.png"))
        .part("photos", multipart::Part::bytes(b"second".to_vec()).file_name("two.jpg"));

    let res = reqwest::Client::new()
        .post(srv.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let names: Vec<String> = res.json().await.unwrap();
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with(".png"));
    assert!(names[1].ends_with(".jpg"));

    let served = reqwest::get(srv.url(&format!("/uploads/{}", names[1]))).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().as_ref(), b"second");
}

#[tokio::test]
async fn upload_with_unexpected_field_is_rejected() {
    let srv = TestServer::spawn().await;
    let form = multipart::Form::new()
        .part("avatar", multipart::Part::bytes(b"x".to_vec()).file_name("x.png"));

    let res = reqwest::Client::new()
        .post(srv.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let srv = TestServer::spawn_with(|c| c.upload_max_bytes = 64 * 1024).await;
    let form = multipart::Form::new()
        .part("photos", multipart::Part::bytes(vec![7u8; 96 * 1024]).file_name("big.png"));

    let res = reqwest::Client::new()
        .post(srv.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(res).await, "payload_too_large");
}

#[tokio::test]
async fn upload_by_link_refuses_internal_addresses_by_default() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let internal = srv.url("/api-docs/openapi.json");
    for link in [internal.as_str(), "http://169.254.169.254/latest/meta-data", "http://localhost/a.jpg"] {
        let res = client
            .post(srv.url("/upload-by-link"))
            .json(&json!({ "link": link }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{link}");
        assert_eq!(error_code(res).await, "upload_rejected");
    }
}

#[tokio::test]
async fn upload_by_link_refuses_non_http_links() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(srv.url("/upload-by-link"))
        .json(&json!({ "link": "file:///etc/passwd" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_by_link_fetches_remote_photo() {
    let srv = TestServer::spawn_with(|c| c.link_policy.allow_private = true).await;

    // The photo source is a second copy of the app serving its /test route.
    let source = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(srv.url("/upload-by-link"))
        .json(&json!({ "link": source.url("/test") }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let name: String = res.json().await.unwrap();
    assert!(name.starts_with("photo") && name.ends_with(".jpg"));

    let served = reqwest::get(srv.url(&format!("/uploads/{name}"))).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().as_ref(), b"\"test ok\"");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let srv = TestServer::spawn().await;
    let doc: Value = reqwest::get(srv.url("/api-docs/openapi.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"]["/bookings"].is_object());
}
