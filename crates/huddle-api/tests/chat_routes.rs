use anyhow::Context;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use huddle_core::cache::ReadThroughCache;
use huddle_core::{AppConfig, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestContext {
    app: Router,
}

/// A registered, logged-in user and the cookies the server handed out.
struct Client {
    id: String,
    cookies: String,
}

fn cookie_jar(headers: &HeaderMap) -> String {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

impl TestContext {
    async fn new() -> anyhow::Result<Self> {
        let db = huddle_db::create_pool("sqlite::memory:", 1).await?;
        huddle_db::run_migrations(&db).await?;

        let mut config = AppConfig::new("integration-test-secret", "integration-refresh-secret");
        config.secure_cookies = false;
        let state = AppState::new(db, ReadThroughCache::in_memory(1_000), config);

        let app = huddle_api::build_router(None).with_state(state);
        Ok(Self { app })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        cookies: Option<&str>,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, HeaderMap, Value)> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(cookies) = cookies {
            builder = builder.header(header::COOKIE, cookies);
        }

        let request = if let Some(payload) = body {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::from(payload.to_string()))?
        } else {
            builder.body(Body::empty())?
        };

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let payload = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&body_bytes) }))
        };

        Ok((status, headers, payload))
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        client: Option<&Client>,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, Value)> {
        let (status, _, payload) = self
            .request(method, path, client.map(|c| c.cookies.as_str()), body)
            .await?;
        Ok((status, payload))
    }

    async fn sign_up(&self, username: &str) -> anyhow::Result<Client> {
        let password = "correct horse battery";
        let (status, payload) = self
            .request_json(
                Method::POST,
                "/api/users/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": password,
                    "publicKey": format!("pk-{username}"),
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "register failed: {payload}");

        let (status, headers, payload) = self
            .request(
                Method::POST,
                "/api/users/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await?;
        assert_eq!(status, StatusCode::ACCEPTED, "login failed: {payload}");

        Ok(Client {
            id: payload["data"]["id"]
                .as_str()
                .context("user id should be a string")?
                .to_string(),
            cookies: cookie_jar(&headers),
        })
    }

    async fn create_group(&self, owner: &Client, name: &str) -> anyhow::Result<String> {
        let (status, payload) = self
            .request_json(
                Method::POST,
                "/api/groups/createGroup",
                Some(owner),
                Some(json!({ "name": name })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "create group failed: {payload}");
        Ok(payload["data"]["id"]
            .as_str()
            .context("group id should be a string")?
            .to_string())
    }
}

#[tokio::test]
async fn register_login_and_logout_follow_the_status_contract() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let alice = ctx.sign_up("alice").await?;
    assert!(alice.cookies.contains("accessToken="));
    assert!(alice.cookies.contains("refreshToken="));

    let (status, payload) = ctx
        .request_json(
            Method::POST,
            "/api/users/register",
            None,
            Some(json!({ "username": "alice", "email": "other@example.com", "password": "long enough" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(payload["success"], false);
    assert_eq!(payload["statuscode"], 409);

    let (status, _) = ctx
        .request_json(
            Method::POST,
            "/api/users/register",
            None,
            Some(json!({ "username": "bob" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = ctx
        .request_json(
            Method::POST,
            "/api/users/login",
            None,
            Some(json!({ "username": "ghost", "password": "whatever!" })),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = ctx
        .request_json(
            Method::POST,
            "/api/users/login",
            None,
            Some(json!({ "username": "alice", "password": "not the password" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, me) = ctx
        .request_json(Method::GET, "/api/users/me", Some(&alice), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["username"], "alice");
    assert!(me["data"].get("password").is_none());
    assert!(me["data"].get("refreshToken").is_none());

    let (status, headers, _) = ctx
        .request(Method::POST, "/api/users/logout", Some(&alice.cookies), None)
        .await?;
    assert_eq!(status, StatusCode::NON_AUTHORITATIVE_INFORMATION);
    let cleared: Vec<_> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert_eq!(cleared.len(), 2);
    assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
    Ok(())
}

#[tokio::test]
async fn refresh_token_rotates_once() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let alice = ctx.sign_up("alice").await?;

    let (status, headers, _) = ctx
        .request(Method::POST, "/api/users/refresh-token", Some(&alice.cookies), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(!cookie_jar(&headers).is_empty());

    let (status, _, _) = ctx
        .request(Method::POST, "/api/users/refresh-token", Some(&alice.cookies), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn unauthenticated_group_mutations_are_rejected_without_effect() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let owner = ctx.sign_up("owner").await?;
    let member = ctx.sign_up("member").await?;
    let group_id = ctx.create_group(&owner, "Eng").await?;

    let mutations = [
        (Method::POST, "/api/groups/createGroup".to_string()),
        (Method::PATCH, format!("/api/groups/members/{group_id}/{}", member.id)),
        (Method::DELETE, format!("/api/groups/members/{group_id}/{}", member.id)),
        (Method::PATCH, format!("/api/groups/admins/{group_id}/{}", member.id)),
        (Method::DELETE, format!("/api/groups/admins/remove/{group_id}/{}", member.id)),
        (Method::DELETE, format!("/api/groups/deleteGroup/{group_id}")),
    ];
    for (method, path) in mutations {
        let (status, payload) = ctx
            .request_json(method, &path, None, Some(json!({ "name": "x" })))
            .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(payload["message"], "Unauthorized request");
    }

    let (status, details) = ctx
        .request_json(
            Method::GET,
            &format!("/api/groups/groupDetails/{group_id}"),
            Some(&owner),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["data"]["members"], json!([]));
    Ok(())
}

#[tokio::test]
async fn admin_cannot_strip_the_owner_and_owner_messages_carry_owner_role() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let u1 = ctx.sign_up("u1").await?;
    let u2 = ctx.sign_up("u2").await?;
    let u3 = ctx.sign_up("u3").await?;
    let group_id = ctx.create_group(&u1, "Eng").await?;

    let (status, _) = ctx
        .request_json(
            Method::PATCH,
            &format!("/api/groups/admins/{group_id}/{}", u2.id),
            Some(&u1),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "promotion requires membership");

    let (status, group) = ctx
        .request_json(
            Method::PATCH,
            &format!("/api/groups/members/{group_id}/{}", u2.id),
            Some(&u1),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["data"]["members"], json!([u2.id]));

    let (status, group) = ctx
        .request_json(
            Method::PATCH,
            &format!("/api/groups/admins/{group_id}/{}", u2.id),
            Some(&u1),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["data"]["admins"], json!([u2.id]));

    let (status, _) = ctx
        .request_json(
            Method::DELETE,
            &format!("/api/groups/admins/remove/{group_id}/{}", u1.id),
            Some(&u2),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx
        .request_json(
            Method::GET,
            &format!("/api/messages/group/{group_id}"),
            Some(&u3),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, sent) = ctx
        .request_json(
            Method::POST,
            &format!("/api/messages/group/{group_id}"),
            Some(&u1),
            Some(json!({ "content": "hi" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["data"]["receiverGroup"], json!(group_id));

    let (status, thread) = ctx
        .request_json(
            Method::GET,
            &format!("/api/messages/group/{group_id}"),
            Some(&u2),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thread["data"][0]["senderRole"], "owner");
    assert_eq!(thread["data"][0]["senderDetails"]["username"], "u1");
    Ok(())
}

#[tokio::test]
async fn deleting_a_direct_message_is_reflected_in_the_next_read() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let u1 = ctx.sign_up("u1").await?;
    let u2 = ctx.sign_up("u2").await?;

    let mut ids = Vec::new();
    for (from, to, text) in [(&u1, &u2, "one"), (&u2, &u1, "two"), (&u1, &u2, "three")] {
        let (status, sent) = ctx
            .request_json(
                Method::POST,
                &format!("/api/messages/user/{}", to.id),
                Some(from),
                Some(json!({ "content": text })),
            )
            .await?;
        assert_eq!(status, StatusCode::OK, "{sent}");
        ids.push(sent["data"]["id"].as_str().context("message id")?.to_string());
    }

    let thread_path = format!("/api/messages/user/{}", u2.id);
    let (_, thread) = ctx.request_json(Method::GET, &thread_path, Some(&u1), None).await?;
    assert_eq!(thread["data"].as_array().map(Vec::len), Some(3));

    let (status, _) = ctx
        .request_json(
            Method::DELETE,
            &format!("/api/messages/user/del/{}", ids[1]),
            Some(&u1),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "only the sender may delete");

    let (status, _) = ctx
        .request_json(
            Method::DELETE,
            &format!("/api/messages/user/del/{}", ids[1]),
            Some(&u2),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (_, thread) = ctx.request_json(Method::GET, &thread_path, Some(&u1), None).await?;
    let contents: Vec<_> = thread["data"]
        .as_array()
        .context("thread should be an array")?
        .iter()
        .map(|m| m["content"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(contents, ["one", "three"]);

    let (status, list) = ctx.request_json(Method::GET, "/api/messages", Some(&u2), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"][0]["content"], "three");
    Ok(())
}

fn thread_contents(thread: &Value) -> anyhow::Result<Vec<String>> {
    Ok(thread["data"]
        .as_array()
        .context("thread should be an array")?
        .iter()
        .map(|m| m["content"].as_str().unwrap_or_default().to_string())
        .collect())
}

#[tokio::test]
async fn group_sends_and_deletes_are_reflected_in_the_cached_thread() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let u1 = ctx.sign_up("u1").await?;
    let u2 = ctx.sign_up("u2").await?;
    let group_id = ctx.create_group(&u1, "Eng").await?;
    let (status, _) = ctx
        .request_json(
            Method::PATCH,
            &format!("/api/groups/members/{group_id}/{}", u2.id),
            Some(&u1),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let thread_path = format!("/api/messages/group/{group_id}");
    let (status, _) = ctx
        .request_json(Method::POST, &thread_path, Some(&u1), Some(json!({ "content": "first" })))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (_, thread) = ctx.request_json(Method::GET, &thread_path, Some(&u2), None).await?;
    assert_eq!(thread_contents(&thread)?, ["first"]);

    let (status, sent) = ctx
        .request_json(Method::POST, &thread_path, Some(&u2), Some(json!({ "content": "second" })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let second_id = sent["data"]["id"].as_str().context("message id")?.to_string();

    let (_, thread) = ctx.request_json(Method::GET, &thread_path, Some(&u1), None).await?;
    assert_eq!(thread_contents(&thread)?, ["first", "second"]);

    let delete_path = format!("/api/messages/group/del/{second_id}");
    let (status, _) = ctx
        .request_json(Method::DELETE, &delete_path, Some(&u1), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "only the sender may delete");

    let (status, _) = ctx
        .request_json(Method::DELETE, &delete_path, Some(&u2), None)
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (_, thread) = ctx.request_json(Method::GET, &thread_path, Some(&u2), None).await?;
    assert_eq!(thread_contents(&thread)?, ["first"]);

    let (status, _) = ctx
        .request_json(Method::DELETE, &delete_path, Some(&u2), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn malformed_ids_and_blank_messages_are_bad_requests() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let u1 = ctx.sign_up("u1").await?;

    let (status, _) = ctx
        .request_json(Method::GET, "/api/messages/user/not-an-id", Some(&u1), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, payload) = ctx
        .request_json(
            Method::POST,
            &format!("/api/messages/user/{}", u1.id),
            Some(&u1),
            Some(json!({ "content": "   " })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["message"], "Need some text to send");
    Ok(())
}
