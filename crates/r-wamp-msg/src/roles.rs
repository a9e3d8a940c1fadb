//! ---
//! wamp_section: "02-messaging-wire-protocol"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "WAMP message schema and protocol codec."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value as JsonValue};

use crate::types::Details;

/// Role name mapped to the set of features enabled for it.
pub type RoleFeatures = BTreeMap<String, BTreeSet<String>>;

/// Roles and feature flags announced by this client in HELLO.
pub fn client_roles() -> JsonValue {
    json!({
        "publisher": {
            "features": {
                "subscriber_blackwhite_listing": true,
                "publisher_exclusion": true,
                "publisher_identification": true
            }
        },
        "subscriber": {
            "features": {
                "pattern_based_subscription": true,
                "publication_trustlevels": true
            }
        },
        "caller": {
            "features": {
                "caller_identification": true,
                "progressive_call_results": true,
                "call_canceling": true,
                "call_timeout": true
            }
        },
        "callee": {
            "features": {
                "caller_identification": true,
                "call_trustlevels": true,
                "pattern_based_registration": true,
                "shared_registration": true
            }
        }
    })
}

/// Build the HELLO details dictionary: authentication methods plus roles.
pub fn hello_details(auth_methods: &[String]) -> Details {
    let mut details = Details::new();
    details.insert("authmethods".into(), json!(auth_methods));
    details.insert("roles".into(), client_roles());
    details
}

/// Extract the `roles` announcement from WELCOME details.
///
/// Only features whose flag is `true` are kept. Roles without a `features`
/// dictionary map to an empty set.
pub fn parse_roles(details: &Details) -> RoleFeatures {
    let Some(JsonValue::Object(roles)) = details.get("roles") else {
        return RoleFeatures::new();
    };
    roles
        .iter()
        .map(|(role, body)| {
            let features = body
                .get("features")
                .and_then(JsonValue::as_object)
                .map(|features| {
                    features
                        .iter()
                        .filter(|(_, enabled)| enabled.as_bool() == Some(true))
                        .map(|(name, _)| name.clone())
                        .collect()
                })
                .unwrap_or_default();
            (role.clone(), features)
        })
        .collect()
}
