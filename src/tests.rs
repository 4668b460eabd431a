use std::sync::Arc;

use poem::http::StatusCode;
use poem::test::TestClient;
use poem::Route;
use poem_openapi::OpenApiService;
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::controller::{ImageLifecycleManager, LifecycleSettings};
use crate::repository::backends::memory::{MemoryAlbumDirectory, MemoryRepository};
use crate::repository::backends::MetadataConfigs;
use crate::storage::backends::memory::MemoryBackend;

const DEVELOPMENT_CONFIG: &str = include_str!("../tests/configs/development.yaml");
const PRODUCTION_CONFIG: &str = include_str!("../tests/configs/production.yaml");
const BOUNDARY: &str = "album-images-boundary";
const TEST_IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nnot really decoded";

struct TestEnv {
    app: TestClient<Route>,
    storage: Arc<MemoryBackend>,
    albums: Arc<MemoryAlbumDirectory>,
}

fn setup_environment(cfg: &str) -> anyhow::Result<TestEnv> {
    let cfg: RuntimeConfig = serde_yaml::from_str(cfg)?;

    let albums = match &cfg.metadata {
        MetadataConfigs::Memory { albums } => albums.clone(),
        other => anyhow::bail!("test configs must use the memory store, got {:?}", other),
    };

    let storage = Arc::new(MemoryBackend::default());
    let albums = Arc::new(MemoryAlbumDirectory::with_albums(albums));
    let manager = ImageLifecycleManager::new(
        storage.clone(),
        Arc::new(MemoryRepository::default()),
        albums.clone(),
        LifecycleSettings::from(&cfg),
    );

    let api = OpenApiService::new(
        crate::routes::AlbumImagesApi::new(Arc::new(manager), cfg.exposes_internal_errors()),
        "Album Images API",
        env!("CARGO_PKG_VERSION"),
    );

    let app = Route::new().nest("/api/v1", crate::routes::guarded(api, cfg.max_upload_size));
    Ok(TestEnv {
        app: TestClient::new(app),
        storage,
        albums,
    })
}

enum Part<'a> {
    File {
        filename: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
    Text(&'a str, &'a str),
}

fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = vec![];
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                filename,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        filename, content_type,
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            },
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}", name, value).as_bytes(),
                );
            },
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn png_part(data: &[u8]) -> Part {
    Part::File {
        filename: "sunset.png",
        content_type: "image/png",
        data,
    }
}

async fn upload(env: &TestEnv, album_id: &str, parts: &[Part<'_>]) -> poem::test::TestResponse {
    env.app
        .post(format!("/api/v1/albums/{}/images", album_id))
        .content_type(format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(multipart_body(parts))
        .send()
        .await
}

async fn upload_image_id(env: &TestEnv, album_id: &str) -> String {
    let res = upload(env, album_id, &[png_part(TEST_IMAGE)]).await;
    res.assert_status(StatusCode::CREATED);

    let body = res.json().await;
    body.value().object().get("image").object().get("image_id").string().to_string()
}

#[tokio::test]
async fn test_upload_list_and_serve() -> anyhow::Result<()> {
    let env = setup_environment(PRODUCTION_CONFIG)?;

    let res = upload(
        &env,
        "holiday",
        &[png_part(TEST_IMAGE), Part::Text("tags", r#"["sea", "sun"]"#), Part::Text("person", "Alice")],
    )
    .await;
    res.assert_status(StatusCode::CREATED);

    let body = res.json().await;
    let body = body.value().object();
    body.get("success").assert_bool(true);

    let image = body.get("image").object();
    image.get("album_id").assert_string("holiday");
    image.get("content_type").assert_string("image/png");
    image.get("person").assert_string("Alice");
    image.get("is_favorite").assert_bool(false);
    assert_eq!(image.get("tags").string_array(), vec!["sea", "sun"]);
    let image_id = image.get("image_id").string().to_string();

    assert_eq!(env.storage.len().await, 1);

    let res = env.app.get("/api/v1/albums/holiday/images").send().await;
    res.assert_status(StatusCode::OK);
    let body = res.json().await;
    body.value().object().get("count").assert_i64(1);

    let res = env
        .app
        .get(format!("/api/v1/albums/holiday/images/{}/file", image_id))
        .send()
        .await;
    res.assert_status(StatusCode::OK);
    res.assert_content_type("image/png");
    res.assert_bytes(TEST_IMAGE).await;

    Ok(())
}

#[tokio::test]
async fn test_invalid_uploads_are_rejected() -> anyhow::Result<()> {
    let env = setup_environment(DEVELOPMENT_CONFIG)?;

    let res = upload(&env, "holiday", &[Part::Text("person", "Alice")]).await;
    res.assert_status(StatusCode::BAD_REQUEST);
    res.json().await.value().object().get("message").assert_string("No file provided");

    let res = upload(
        &env,
        "holiday",
        &[Part::File {
            filename: "notes.txt",
            content_type: "text/plain",
            data: b"hello",
        }],
    )
    .await;
    res.assert_status(StatusCode::BAD_REQUEST);
    res.json()
        .await
        .value()
        .object()
        .get("message")
        .assert_string("Only image files are allowed.");

    let res = upload(&env, "holiday", &[png_part(TEST_IMAGE), Part::Text("tags", "sea")]).await;
    res.assert_status(StatusCode::BAD_REQUEST);
    res.json().await.value().object().get("message").assert_string("Invalid tags format");

    let large = vec![0u8; 1024 * 1024 + 1];
    let res = upload(&env, "holiday", &[png_part(&large)]).await;
    res.assert_status(StatusCode::BAD_REQUEST);
    res.json()
        .await
        .value()
        .object()
        .get("message")
        .assert_string("File size too large. Maximum size is 1MB.");

    assert_eq!(env.storage.len().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_upload_with_two_files_is_rejected() -> anyhow::Result<()> {
    let env = setup_environment(DEVELOPMENT_CONFIG)?;

    let res = upload(&env, "holiday", &[png_part(TEST_IMAGE), png_part(TEST_IMAGE)]).await;
    res.assert_status(StatusCode::BAD_REQUEST);

    let body = res.json().await;
    let body = body.value().object();
    body.get("success").assert_bool(false);
    body.get("message")
        .assert_string("Too many files. Only one file is allowed.");

    assert_eq!(env.storage.len().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_declared_oversized_body_is_refused() -> anyhow::Result<()> {
    let env = setup_environment(DEVELOPMENT_CONFIG)?;

    let res = env
        .app
        .post("/api/v1/albums/holiday/images")
        .content_type(format!("multipart/form-data; boundary={}", BOUNDARY))
        .header("content-length", (4 * 1024 * 1024).to_string())
        .body(multipart_body(&[png_part(TEST_IMAGE)]))
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);

    let body = res.json().await;
    let body = body.value().object();
    body.get("success").assert_bool(false);
    body.get("message")
        .assert_string("File size too large. Maximum size is 1MB.");

    assert_eq!(env.storage.len().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_request_errors_use_the_error_body() -> anyhow::Result<()> {
    let env = setup_environment(PRODUCTION_CONFIG)?;

    let res = env
        .app
        .put("/api/v1/albums/holiday/images/not-a-uuid/favorite")
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);
    let body = res.json().await;
    let body = body.value().object();
    body.get("success").assert_bool(false);
    body.get("message").string();

    let res = env
        .app
        .post("/api/v1/albums/holiday/images")
        .content_type("application/json")
        .body(r#"{"image": "sunset.png"}"#)
        .send()
        .await;
    res.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = res.json().await;
    body.value().object().get("success").assert_bool(false);

    let res = env.app.get("/api/v1/nowhere").send().await;
    res.assert_status(StatusCode::NOT_FOUND);
    let body = res.json().await;
    body.value().object().get("success").assert_bool(false);

    Ok(())
}

#[tokio::test]
async fn test_upload_to_unknown_album() -> anyhow::Result<()> {
    let env = setup_environment(PRODUCTION_CONFIG)?;

    let res = upload(&env, "does-not-exist", &[png_part(TEST_IMAGE)]).await;
    res.assert_status(StatusCode::NOT_FOUND);
    res.json().await.value().object().get("message").assert_string("Album not found");
    assert_eq!(env.storage.len().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_delete_single_image() -> anyhow::Result<()> {
    let env = setup_environment(PRODUCTION_CONFIG)?;
    let image_id = upload_image_id(&env, "holiday").await;

    let path = format!("/api/v1/albums/holiday/images/{}", image_id);
    let res = env.app.delete(&path).send().await;
    res.assert_status(StatusCode::OK);
    let body = res.json().await;
    body.value().object().get("result").object().get("deleted").assert_bool(true);
    assert_eq!(env.storage.len().await, 0);

    let res = env.app.delete(&path).send().await;
    res.assert_status(StatusCode::NOT_FOUND);
    res.json().await.value().object().get("message").assert_string("Image not found");

    Ok(())
}

#[tokio::test]
async fn test_image_is_scoped_to_its_album() -> anyhow::Result<()> {
    let env = setup_environment(DEVELOPMENT_CONFIG)?;
    let image_id = upload_image_id(&env, "holiday").await;

    let res = env
        .app
        .delete(format!("/api/v1/albums/family/images/{}", image_id))
        .send()
        .await;
    res.assert_status(StatusCode::NOT_FOUND);

    let res = env
        .app
        .get(format!("/api/v1/albums/family/images/{}/file", image_id))
        .send()
        .await;
    res.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(env.storage.len().await, 1);

    Ok(())
}

#[tokio::test]
async fn test_delete_all_album_images() -> anyhow::Result<()> {
    let env = setup_environment(DEVELOPMENT_CONFIG)?;
    for _ in 0..3 {
        upload_image_id(&env, "holiday").await;
    }
    let kept = upload_image_id(&env, "family").await;

    let res = env.app.delete("/api/v1/albums/holiday/images").send().await;
    res.assert_status(StatusCode::OK);
    let body = res.json().await;
    let body = body.value().object();
    body.get("message").assert_string("Deleted 3 images");
    body.get("result").object().get("deleted_count").assert_i64(3);
    assert!(body.get("result").object().get("errors").array().is_empty());

    let res = env.app.get("/api/v1/albums/holiday/images").send().await;
    res.json().await.value().object().get("count").assert_i64(0);

    let res = env.app.get("/api/v1/albums/family/images").send().await;
    let body = res.json().await;
    let images = body.value().object().get("images").object_array();
    assert_eq!(images.len(), 1);
    images[0].get("image_id").assert_string(&kept);
    assert_eq!(env.storage.len().await, 1);

    let res = env.app.delete("/api/v1/albums/holiday/images").send().await;
    res.assert_status(StatusCode::OK);
    res.json()
        .await
        .value()
        .object()
        .get("result")
        .object()
        .get("deleted_count")
        .assert_i64(0);

    Ok(())
}

#[tokio::test]
async fn test_favorite_comment_and_metadata() -> anyhow::Result<()> {
    let env = setup_environment(DEVELOPMENT_CONFIG)?;
    let image_id = upload_image_id(&env, "family").await;
    let base = format!("/api/v1/albums/family/images/{}", image_id);

    let res = env.app.put(format!("{}/favorite", base)).send().await;
    res.assert_status(StatusCode::OK);
    let body = res.json().await;
    body.value().object().get("message").assert_string("Image added to favorites");

    let res = env.app.get("/api/v1/albums/family/images/favorites").send().await;
    res.json().await.value().object().get("count").assert_i64(1);

    let res = env
        .app
        .post(format!("{}/comments", base))
        .content_type("application/json")
        .body(json!({ "author": "user-1", "text": "Lovely" }).to_string())
        .send()
        .await;
    res.assert_status(StatusCode::OK);
    let body = res.json().await;
    let comments = body.value().object().get("image").object().get("comments").object_array();
    assert_eq!(comments.len(), 1);
    comments[0].get("text").assert_string("Lovely");

    let res = env
        .app
        .post(format!("{}/comments", base))
        .content_type("application/json")
        .body(json!({ "author": "user-1", "text": "   " }).to_string())
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);
    res.json().await.value().object().get("message").assert_string("Comment text is required");

    let res = env
        .app
        .put(format!("{}/metadata", base))
        .content_type("application/json")
        .body(json!({ "tags": ["kids", "garden"], "person": "Bob" }).to_string())
        .send()
        .await;
    res.assert_status(StatusCode::OK);
    let body = res.json().await;
    let image = body.value().object().get("image").object();
    image.get("person").assert_string("Bob");
    assert_eq!(image.get("tags").string_array(), vec!["kids", "garden"]);

    let tags: Vec<String> = (0..21).map(|i| format!("tag-{}", i)).collect();
    let res = env
        .app
        .put(format!("{}/metadata", base))
        .content_type("application/json")
        .body(json!({ "tags": tags }).to_string())
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);
    res.json().await.value().object().get("message").assert_string("Maximum 20 tags allowed");

    Ok(())
}

#[tokio::test]
async fn test_reconcile_removes_orphans() -> anyhow::Result<()> {
    let env = setup_environment(DEVELOPMENT_CONFIG)?;
    upload_image_id(&env, "holiday").await;
    upload_image_id(&env, "holiday").await;
    upload_image_id(&env, "family").await;

    assert!(env.albums.remove("holiday").await);

    let res = env.app.post("/api/v1/admin/reconcile").send().await;
    res.assert_status(StatusCode::OK);
    let body = res.json().await;
    body.value().object().get("result").object().get("cleaned_count").assert_i64(2);
    assert_eq!(env.storage.len().await, 1);

    let res = env.app.post("/api/v1/admin/reconcile").send().await;
    res.assert_status(StatusCode::OK);
    res.json()
        .await
        .value()
        .object()
        .get("result")
        .object()
        .get("cleaned_count")
        .assert_i64(0);

    Ok(())
}

#[tokio::test]
async fn test_health() -> anyhow::Result<()> {
    let env = setup_environment(PRODUCTION_CONFIG)?;

    let res = env.app.get("/api/v1/health").send().await;
    res.assert_status_is_ok();
    let body = res.json().await;
    body.value().object().get("status").assert_string("healthy");

    Ok(())
}
