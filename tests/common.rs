//! Common test utilities.
//!
//! An in-process Consul lookalike serving the API subset tether
//! consumes: health-filtered service queries, KV get/acquire/delete,
//! and session create/renew/destroy with the `delete` behaviour.
//! Import with `mod common;` in test files.
#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use base64::Engine;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tether::config::ConsulOpts;
use tether::consul::ConsulClient;
use tokio::task::JoinHandle;

/// One registered member of a service group.
#[derive(Debug, Clone)]
pub struct ServiceMember {
    pub address: String,
    pub port: u16,
    pub healthy: bool,
}

#[derive(Debug, Clone)]
pub struct KvEntry {
    pub value: Vec<u8>,
    pub session: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub ttl: String,
    pub behavior: String,
    pub renewals: u32,
}

/// Shared state behind the fake Consul's handlers.
#[derive(Debug, Default)]
pub struct ConsulState {
    pub services: HashMap<String, Vec<ServiceMember>>,
    pub kv: HashMap<String, KvEntry>,
    pub sessions: HashMap<String, Session>,
    next_session: u64,
}

impl ConsulState {
    /// Destroy a session and apply its `delete` behaviour to held
    /// keys. Also what TTL expiry does.
    fn drop_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        self.kv
            .retain(|_, entry| entry.session.as_deref() != Some(session_id));
    }
}

type SharedState = Arc<Mutex<ConsulState>>;

/// In-process fake Consul bound to a loopback port.
pub struct FakeConsul {
    pub state: SharedState,
    pub addr: SocketAddr,
    server: JoinHandle<()>,
}

impl FakeConsul {
    pub async fn start() -> Self {
        let state: SharedState = Arc::default();
        let router = Router::new()
            .route("/v1/health/service/:name", get(health_service))
            .route("/v1/kv/*key", get(kv_get).put(kv_put).delete(kv_delete))
            .route("/v1/session/create", put(session_create))
            .route("/v1/session/renew/:id", put(session_renew))
            .route("/v1/session/destroy/:id", put(session_destroy))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            state,
            addr,
            server,
        }
    }

    pub fn opts(&self) -> ConsulOpts {
        ConsulOpts {
            address: self.addr.to_string(),
            datacenter: None,
            acl_token: None,
            tls: None,
        }
    }

    pub fn client(&self) -> ConsulClient {
        ConsulClient::new(&self.opts()).unwrap()
    }

    /// Replace a service group's membership.
    pub fn set_service(&self, name: &str, members: &[(&str, u16, bool)]) {
        let members = members
            .iter()
            .map(|(address, port, healthy)| ServiceMember {
                address: address.to_string(),
                port: *port,
                healthy: *healthy,
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .services
            .insert(name.to_string(), members);
    }

    /// Write the scaling document for a destination group.
    pub fn set_scaling(&self, dest_service: &str, primary_count: u32, replica_count: u32) {
        let yaml = format!("primary-count: {primary_count}\nreplica-count: {replica_count}\n");
        self.set_kv_raw(&format!("service/{dest_service}/scaling"), yaml.into_bytes());
    }

    /// Write a raw KV value with no owning session.
    pub fn set_kv_raw(&self, key: &str, value: Vec<u8>) {
        self.state.lock().unwrap().kv.insert(
            key.to_string(),
            KvEntry {
                value,
                session: None,
            },
        );
    }

    pub fn kv_contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().kv.contains_key(key)
    }

    pub fn kv_value(&self, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .kv
            .get(key)
            .map(|entry| entry.value.clone())
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Simulate TTL expiry of a session.
    pub fn expire_session(&self, session_id: &str) {
        self.state.lock().unwrap().drop_session(session_id);
    }

    /// Times a session has been renewed.
    pub fn session_renewals(&self, session_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(session_id)
            .map_or(0, |session| session.renewals)
    }
}

impl Drop for FakeConsul {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn health_service(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let passing_only = params.get("passing").map(String::as_str) == Some("true");
    let state = state.lock().unwrap();
    let entries: Vec<_> = state
        .services
        .get(&name)
        .map(|members| {
            members
                .iter()
                .filter(|member| member.healthy || !passing_only)
                .map(|member| {
                    json!({
                        "Service": {
                            "Address": member.address,
                            "Port": member.port,
                        }
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Json(entries)
}

async fn kv_get(State(state): State<SharedState>, Path(key): Path<String>) -> impl IntoResponse {
    let state = state.lock().unwrap();
    match state.kv.get(&key) {
        Some(entry) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&entry.value);
            Json(vec![json!({"Key": key, "Value": encoded})]).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn kv_put(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    match params.get("acquire") {
        Some(session_id) => {
            if !state.sessions.contains_key(session_id) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "invalid session").into_response();
            }
            let held_by_other = state
                .kv
                .get(&key)
                .and_then(|entry| entry.session.as_deref())
                .is_some_and(|holder| holder != session_id);
            if held_by_other {
                return "false".into_response();
            }
            state.kv.insert(
                key,
                KvEntry {
                    value: body.into_bytes(),
                    session: Some(session_id.clone()),
                },
            );
            "true".into_response()
        }
        None => {
            state.kv.insert(
                key,
                KvEntry {
                    value: body.into_bytes(),
                    session: None,
                },
            );
            "true".into_response()
        }
    }
}

async fn kv_delete(State(state): State<SharedState>, Path(key): Path<String>) -> impl IntoResponse {
    state.lock().unwrap().kv.remove(&key);
    "true"
}

async fn session_create(
    State(state): State<SharedState>,
    body: String,
) -> impl IntoResponse {
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
    let mut state = state.lock().unwrap();
    state.next_session += 1;
    let id = format!("session-{:04}", state.next_session);
    state.sessions.insert(
        id.clone(),
        Session {
            ttl: parsed["TTL"].as_str().unwrap_or_default().to_string(),
            behavior: parsed["Behavior"].as_str().unwrap_or_default().to_string(),
            renewals: 0,
        },
    );
    Json(json!({"ID": id}))
}

async fn session_renew(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let mut state = state.lock().unwrap();
    match state.sessions.get_mut(&id) {
        Some(session) => {
            session.renewals += 1;
            Json(vec![json!({"ID": id})]).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn session_destroy(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.lock().unwrap().drop_session(&id);
    "true"
}
