//! The variable bundle handed to templates.

use super::{RequestHandler, SignalKind};
use crate::class::ManagedClass;
use crate::config::schema::PRIVATE_PARAMETERS;
use crate::config::{ConfigStore, ConfigValue};
use serde_json::{json, Map, Value};

impl RequestHandler {
    pub fn bundle(&self, view: &str) -> Value {
        let settings = &self.config.settings;
        let managed = self.factory.classes().all_managed();
        let classes: Vec<&ManagedClass> = managed.iter().map(|m| m.as_ref()).collect();
        let class = self
            .state
            .moniker
            .as_deref()
            .and_then(|m| managed.iter().find(|c| c.moniker == m))
            .map(|c| c.as_ref());
        let signal = self.state.signal.as_ref().map(|s| {
            let kind = match s.kind {
                SignalKind::NotFound => "not_found",
                SignalKind::AuthRequired => "auth_required",
                SignalKind::ServerError => "server_error",
            };
            json!({ "kind": kind, "detail": s.detail })
        });
        let mut params = Map::new();
        for name in self.request.names() {
            if let Some(v) = self.request.get(name) {
                params.insert(name.to_string(), Value::String(v.to_string()));
            }
        }
        json!({
            "site": {
                "name": settings.site_name,
                "tenant": self.factory.tenant(),
            },
            "view": view,
            "type": self.state.moniker,
            "id": self.state.id,
            "thing": self.state.thing,
            "class": class,
            "classes": classes,
            "list": self.state.results,
            "pager": self.state.pager,
            "config": public_config(&self.config.store),
            "session": self.session,
            "params": params,
            "messages": self.state.messages,
            "errors": self.state.errors,
            "signal": signal,
            "base_url": settings.base_url,
        })
    }
}

/// Every parameter except connection secrets.
fn public_config(store: &ConfigStore) -> Value {
    let mut out = Map::new();
    for name in store.all_names() {
        if PRIVATE_PARAMETERS.contains(&name.as_str()) {
            continue;
        }
        let value = match store.get(&name) {
            Some(ConfigValue::Scalar(s)) => json!(s),
            Some(ConfigValue::List(items)) => json!(items),
            Some(ConfigValue::Map(map)) => json!(map),
            None => continue,
        };
        out.insert(name, value);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_stay_out_of_the_bundle() {
        let mut store = ConfigStore::empty();
        store.set("db_password", ConfigValue::Scalar("hunter2".into())).unwrap();
        store.set("site_name", ConfigValue::Scalar("Jazz".into())).unwrap();
        store.set("class", ConfigValue::List(vec!["music::Cd".into()])).unwrap();
        let config = public_config(&store);
        assert_eq!(config["site_name"], json!("Jazz"));
        assert_eq!(config["class"], json!(["music::Cd"]));
        assert!(config.get("db_password").is_none());
    }
}
