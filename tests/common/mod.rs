#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use custodian_api::access::{AccessRegistry, AccessResolver, Caller};
use custodian_api::app::{router, AppState};
use custodian_api::auth::{generate_jwt, Claims};
use custodian_api::database::MemoryRecordStore;

pub const SECRET: &str = "integration-test-secret";

pub const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/access.yaml");

pub fn registry() -> Arc<AccessRegistry> {
    Arc::new(AccessRegistry::load(FIXTURE).expect("fixture declarations load"))
}

pub fn resolver() -> AccessResolver {
    AccessResolver::new(registry())
}

pub fn alice() -> Caller {
    Caller::new("u-alice").with_right("READ_OWN").with_attribute("email", "alice@x.com")
}

pub fn bob() -> Caller {
    Caller::new("u-bob").with_right("READ_OWN").with_attribute("email", "bob@x.com")
}

pub fn admin() -> Caller {
    Caller::new("u-admin").with_role("ADMIN")
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Four notes across two orgs; joined org rows are embedded under `org`
pub async fn store() -> Arc<MemoryRecordStore> {
    let store = MemoryRecordStore::new();
    let orgs = [json!({"id": 10, "name": "Acme", "owner_id": "u-carol"}), json!({"id": 20, "name": "Globex", "owner_id": "u-dave"})];
    for org in &orgs {
        store.insert("orgs", object(org.clone())).await;
    }

    let notes = [
        (1, "alice draft", "alice@x.com", "private", 10),
        (2, "alice public", "alice@x.com", "public", 20),
        (3, "bob draft", "bob@x.com", "private", 10),
        (4, "bob public", "bob@x.com", "public", 20),
    ];
    for (id, title, created_by, visibility, org_id) in notes {
        let org = if org_id == 10 { orgs[0].clone() } else { orgs[1].clone() };
        store
            .insert(
                "notes",
                object(json!({
                    "id": id,
                    "title": title,
                    "body": format!("body of {}", title),
                    "secret": format!("secret {}", id),
                    "created_by": created_by,
                    "visibility": visibility,
                    "org_id": org_id,
                    "org": org,
                })),
            )
            .await;
    }
    Arc::new(store)
}

pub async fn app() -> Router {
    let state = AppState::new(resolver(), store().await, SECRET);
    router(state)
}

pub fn token(caller: &Caller) -> Result<String> {
    let mut claims = Claims::with_expiry(caller.id().context("caller without id")?, 1);
    claims.kind = caller.kind;
    claims.roles = caller.roles.clone();
    claims.rights = caller.rights.clone();
    claims.attributes = caller.attributes.clone();
    Ok(generate_jwt(&claims, SECRET)?)
}

/// Send one request through the router, returning status and JSON body
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    caller: Option<&Caller>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header("authorization", format!("Bearer {}", token(caller)?));
    }
    let request = match body {
        Some(body) => builder.header("content-type", "application/json").body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let payload = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, payload))
}

/// Ids of the records in a success envelope
pub fn ids(payload: &Value) -> Vec<i64> {
    payload["data"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r["id"].as_i64()).collect())
        .unwrap_or_default()
}
