//! GeoJSON map registration for chart cards

use crate::config::NamedUrl;
use crate::data::{js_error_message, Fetch};
use crate::errors::ErrorCollector;
use futures::future::{join_all, FutureExt, LocalBoxFuture, Shared};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::{error, info, warn};
use wasm_bindgen::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("Invalid map configuration: {0:?}")]
    InvalidConfig(NamedUrl),
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },
    #[error("{0}")]
    Fetch(String),
    #[error("Invalid GeoJSON: {0}")]
    Json(String),
    #[error("Map registration failed: {0}")]
    Register(String),
}

impl From<MapError> for JsValue {
    fn from(e: MapError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

/// Chart-library side of map registration
pub trait MapRegistry {
    fn register_map(&self, name: &str, geo_json: &Value) -> Result<(), MapError>;
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = echarts, js_name = registerMap, catch)]
    fn echarts_register_map(name: &str, geo_json: &JsValue) -> Result<(), JsValue>;
}

/// `echarts.registerMap` on the page's global chart library
#[derive(Debug, Clone, Copy, Default)]
pub struct EchartsRegistry;

impl MapRegistry for EchartsRegistry {
    fn register_map(&self, name: &str, geo_json: &Value) -> Result<(), MapError> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let value = serde::Serialize::serialize(geo_json, &serializer)
            .map_err(|e| MapError::Register(e.to_string()))?;
        echarts_register_map(name, &value).map_err(|e| MapError::Register(js_error_message(&e)))
    }
}

fn empty_feature_collection() -> Value {
    json!({ "type": "FeatureCollection", "features": [] })
}

type PendingRegistration = Shared<LocalBoxFuture<'static, bool>>;

#[derive(Default)]
struct MapState {
    config: Vec<NamedUrl>,
    registered: HashSet<String>,
    results: HashMap<String, bool>,
    pending: HashMap<String, PendingRegistration>,
}

/// Registers the maps listed in the project config, at most once per name
pub struct MapManager {
    fetch: Rc<dyn Fetch>,
    registry: Rc<dyn MapRegistry>,
    collector: Rc<ErrorCollector>,
    state: RefCell<MapState>,
}

impl MapManager {
    pub fn new(fetch: Rc<dyn Fetch>, registry: Rc<dyn MapRegistry>, collector: Rc<ErrorCollector>) -> Self {
        Self {
            fetch,
            registry,
            collector,
            state: RefCell::new(MapState::default()),
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state.borrow().registered.contains(name)
    }

    pub fn is_registering(&self, name: &str) -> bool {
        self.state.borrow().pending.contains_key(name)
    }

    pub fn config(&self) -> Vec<NamedUrl> {
        self.state.borrow().config.clone()
    }

    /// Bring registrations in line with a new map list
    ///
    /// Removed maps are unregistered, maps whose URL changed are reloaded and
    /// new maps are registered.
    pub async fn sync_maps_config(&self, maps: Vec<NamedUrl>) {
        let old = std::mem::replace(&mut self.state.borrow_mut().config, maps.clone());
        let find = |list: &[NamedUrl], name: &str| list.iter().find(|m| m.name == name).cloned();

        let removed: Vec<NamedUrl> = old.iter().filter(|m| find(&maps, &m.name).is_none()).cloned().collect();
        let modified: Vec<NamedUrl> = maps
            .iter()
            .filter(|m| find(&old, &m.name).is_some_and(|o| o.url != m.url))
            .cloned()
            .collect();
        let added: Vec<NamedUrl> = maps.iter().filter(|m| find(&old, &m.name).is_none()).cloned().collect();

        for map in &removed {
            self.unregister_map(&map.name).await;
        }
        for map in &modified {
            self.unregister_map(&map.name).await;
            self.state.borrow_mut().results.remove(&map.name);
            self.register_map(map).await;
        }
        for map in &added {
            self.register_map(map).await;
        }
        info!(
            target: "maps",
            added = added.len(),
            modified = modified.len(),
            removed = removed.len(),
            "map configuration synchronized"
        );
    }

    pub async fn register_map(&self, map: &NamedUrl) -> bool {
        if map.name.is_empty() || map.url.is_empty() {
            warn!(target: "maps", "{}", MapError::InvalidConfig(map.clone()));
            return false;
        }

        let pending = self.state.borrow().pending.get(&map.name).cloned();
        if let Some(pending) = pending {
            return pending.await;
        }
        {
            let state = self.state.borrow();
            if state.registered.contains(&map.name) || state.results.get(&map.name) == Some(&true) {
                return true;
            }
        }

        let registration = self.perform_registration(map).boxed_local().shared();
        self.state
            .borrow_mut()
            .pending
            .insert(map.name.clone(), registration.clone());
        let ok = registration.await;

        let mut state = self.state.borrow_mut();
        state.pending.remove(&map.name);
        state.results.insert(map.name.clone(), ok);
        if ok {
            state.registered.insert(map.name.clone());
            info!(target: "maps", name = %map.name, "registered");
        }
        ok
    }

    fn perform_registration(&self, map: &NamedUrl) -> impl std::future::Future<Output = bool> + 'static {
        let fetch = self.fetch.clone();
        let registry = self.registry.clone();
        let collector = self.collector.clone();
        let NamedUrl { name, url } = map.clone();

        async move {
            let result: Result<(), MapError> = async {
                let response = fetch.fetch(&url).await.map_err(MapError::Fetch)?;
                if !response.ok() {
                    collector.collect_map_load_error(&url, response.status, &response.status_text);
                    return Err(MapError::Http {
                        status: response.status,
                        status_text: response.status_text,
                    });
                }
                let geo_json: Value =
                    serde_json::from_str(&response.body).map_err(|e| MapError::Json(e.to_string()))?;
                registry.register_map(&name, &geo_json)
            }
            .await;

            match result {
                Ok(()) => true,
                Err(e) => {
                    error!(target: "maps", name = %name, "registration failed: {}", e);
                    false
                }
            }
        }
    }

    /// Replace a registered map with an empty feature collection
    pub async fn unregister_map(&self, name: &str) -> bool {
        if name.is_empty() {
            warn!(target: "maps", "invalid map name");
            return false;
        }
        let pending = self.state.borrow().pending.get(name).cloned();
        if let Some(pending) = pending {
            pending.await;
        }
        if !self.is_registered(name) {
            return true;
        }
        match self.registry.register_map(name, &empty_feature_collection()) {
            Ok(()) => {
                let mut state = self.state.borrow_mut();
                state.registered.remove(name);
                state.results.remove(name);
                true
            }
            Err(e) => {
                error!(target: "maps", name, "unregistration failed: {}", e);
                false
            }
        }
    }

    /// Registered already, registered by an in-flight load, or registered now from config
    pub async fn ensure_map_registered(&self, name: &str) -> bool {
        if self.is_registered(name) {
            return true;
        }
        let pending = self.state.borrow().pending.get(name).cloned();
        if let Some(pending) = pending {
            return pending.await;
        }
        let configured = self.state.borrow().config.iter().find(|m| m.name == name).cloned();
        match configured {
            Some(map) => self.register_map(&map).await,
            None => {
                warn!(target: "maps", name, "map not in configuration");
                false
            }
        }
    }

    /// `true` when every named map ends up registered
    pub async fn ensure_maps_registered(&self, names: &[String]) -> bool {
        if names.is_empty() {
            return true;
        }
        let results = join_all(names.iter().map(|name| self.ensure_map_registered(name))).await;
        let succeeded = results.iter().filter(|ok| **ok).count();
        info!(target: "maps", succeeded, total = names.len(), "map registration completed");
        succeeded == names.len()
    }
}
