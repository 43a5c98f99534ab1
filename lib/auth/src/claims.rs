//! JWT claim extraction without signature verification.
//!
//! Signature verification is the identity provider's responsibility during
//! token exchange; this module only decodes payloads to read claims out of
//! already-validated tokens.

use serde_json::{Map, Value};

/// A decoded JWT payload.
pub type Claims = Map<String, Value>;

/// Display name used when the token carries no usable name claims.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Decodes a JWT payload without verifying the signature.
///
/// Returns `None` on any malformed input: wrong segment count, invalid
/// base64url, invalid JSON, or a payload that is not a JSON object.
#[must_use]
pub fn decode_unverified_payload(token: &str) -> Option<Claims> {
    use base64::Engine;

    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;

    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;

    match serde_json::from_slice::<Value>(&payload_bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Resolves a display name from standard OIDC claims with fallbacks.
///
/// Precedence: `name`, then `preferred_username`, then
/// `"{given_name} {family_name}"` when both are present, then a fixed
/// fallback literal.
#[must_use]
pub fn resolve_display_name(claims: &Claims) -> String {
    if let Some(name) = non_blank_str(claims.get("name")) {
        return name.to_string();
    }
    if let Some(username) = non_blank_str(claims.get("preferred_username")) {
        return username.to_string();
    }
    if let (Some(given), Some(family)) = (
        claims.get("given_name").and_then(Value::as_str),
        claims.get("family_name").and_then(Value::as_str),
    ) {
        return format!("{given} {family}").trim().to_string();
    }
    UNKNOWN_USER.to_string()
}

fn non_blank_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// The shapes role claims arrive in.
///
/// Different providers place roles differently; these are the three known
/// layouts, handled exhaustively instead of probing arbitrary objects.
#[derive(Debug)]
enum RoleSource<'a> {
    /// A top-level `roles` array on the token.
    TopLevel(&'a Value),
    /// Keycloak-style `realm_access` object with a `roles` array.
    RealmAccess(&'a Value),
    /// Keycloak-style `resource_access` map of client id to roles object.
    ResourceAccess(&'a Map<String, Value>),
}

fn role_sources(claims: &Claims) -> Vec<RoleSource<'_>> {
    let mut sources = Vec::new();
    if let Some(value) = claims.get("roles") {
        sources.push(RoleSource::TopLevel(value));
    }
    if let Some(value) = claims.get("realm_access") {
        sources.push(RoleSource::RealmAccess(value));
    }
    if let Some(Value::Object(map)) = claims.get("resource_access") {
        sources.push(RoleSource::ResourceAccess(map));
    }
    sources
}

/// Extracts the role set from token claims.
///
/// When `client_id` is present as a `resource_access` key, that client's
/// roles are authoritative and returned alone. Otherwise the top-level
/// `roles` array, `realm_access.roles`, and every `resource_access` entry
/// are unioned. Non-string array entries are dropped silently; the result
/// is de-duplicated, preserving first-seen order.
#[must_use]
pub fn extract_roles(claims: &Claims, client_id: Option<&str>) -> Vec<String> {
    if let (Some(id), Some(Value::Object(map))) = (client_id, claims.get("resource_access"))
        && let Some(entry) = map.get(id)
    {
        let mut roles = Vec::new();
        collect_access_roles(entry, &mut roles);
        return roles;
    }

    let mut roles = Vec::new();
    for source in role_sources(claims) {
        match source {
            RoleSource::TopLevel(value) => collect_string_roles(value, &mut roles),
            RoleSource::RealmAccess(value) => collect_access_roles(value, &mut roles),
            RoleSource::ResourceAccess(map) => {
                for entry in map.values() {
                    collect_access_roles(entry, &mut roles);
                }
            }
        }
    }
    roles
}

/// Collects string entries from a `roles` array, skipping everything else.
fn collect_string_roles(value: &Value, roles: &mut Vec<String>) {
    let Some(entries) = value.as_array() else {
        return;
    };
    for entry in entries {
        if let Some(role) = entry.as_str()
            && !roles.iter().any(|r| r == role)
        {
            roles.push(role.to_string());
        }
    }
}

/// Collects roles from a `{"roles": [...]}` access object.
fn collect_access_roles(value: &Value, roles: &mut Vec<String>) {
    if let Some(inner) = value.get("roles") {
        collect_string_roles(inner, roles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        match value {
            Value::Object(map) => map,
            _ => panic!("test claims must be an object"),
        }
    }

    fn encode_payload(value: &Value) -> String {
        use base64::Engine;
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(value).expect("serialize payload"));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn decodes_valid_payload() {
        let token = encode_payload(&json!({"sub": "u1", "name": "Max"}));
        let decoded = decode_unverified_payload(&token).expect("decode");
        assert_eq!(decoded.get("sub"), Some(&json!("u1")));
        assert_eq!(decoded.get("name"), Some(&json!("Max")));
    }

    #[test]
    fn decode_rejects_missing_segments() {
        assert!(decode_unverified_payload("only-one-segment").is_none());
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(decode_unverified_payload("a.!!!not-base64!!!.c").is_none());
    }

    #[test]
    fn decode_rejects_non_object_payload() {
        use base64::Engine;
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"42");
        assert!(decode_unverified_payload(&format!("h.{payload}.s")).is_none());
    }

    #[test]
    fn decode_rejects_invalid_json() {
        use base64::Engine;
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{not json");
        assert!(decode_unverified_payload(&format!("h.{payload}.s")).is_none());
    }

    #[test]
    fn display_name_prefers_name() {
        let c = claims(json!({
            "name": "Max Mustermann",
            "preferred_username": "max",
            "given_name": "Max",
            "family_name": "Mustermann"
        }));
        assert_eq!(resolve_display_name(&c), "Max Mustermann");
    }

    #[test]
    fn display_name_skips_blank_name() {
        let c = claims(json!({"name": "   ", "preferred_username": "max"}));
        assert_eq!(resolve_display_name(&c), "max");
    }

    #[test]
    fn display_name_combines_given_and_family() {
        let c = claims(json!({"given_name": "Max", "family_name": "Mustermann"}));
        assert_eq!(resolve_display_name(&c), "Max Mustermann");
    }

    #[test]
    fn display_name_requires_both_name_parts() {
        let c = claims(json!({"given_name": "Max"}));
        assert_eq!(resolve_display_name(&c), UNKNOWN_USER);
    }

    #[test]
    fn display_name_falls_back_for_empty_claims() {
        let c = claims(json!({}));
        assert_eq!(resolve_display_name(&c), UNKNOWN_USER);
    }

    #[test]
    fn roles_scoped_to_client_when_present() {
        let c = claims(json!({
            "realm_access": {"roles": ["a", "b"]},
            "resource_access": {"client-x": {"roles": ["c"]}}
        }));
        assert_eq!(extract_roles(&c, Some("client-x")), vec!["c"]);
    }

    #[test]
    fn roles_union_without_client_id() {
        let c = claims(json!({
            "realm_access": {"roles": ["a", "b"]},
            "resource_access": {"client-x": {"roles": ["c"]}}
        }));
        assert_eq!(extract_roles(&c, None), vec!["a", "b", "c"]);
    }

    #[test]
    fn roles_union_when_client_id_absent_from_resource_access() {
        let c = claims(json!({
            "roles": ["top"],
            "resource_access": {"other-client": {"roles": ["x"]}}
        }));
        assert_eq!(extract_roles(&c, Some("client-x")), vec!["top", "x"]);
    }

    #[test]
    fn roles_deduplicate_across_sources() {
        let c = claims(json!({
            "roles": ["admin"],
            "realm_access": {"roles": ["admin", "user"]},
            "resource_access": {"svc": {"roles": ["user"]}}
        }));
        assert_eq!(extract_roles(&c, None), vec!["admin", "user"]);
    }

    #[test]
    fn roles_drop_non_string_entries() {
        let c = claims(json!({"roles": ["a", 7, null, {"x": 1}, "b"]}));
        assert_eq!(extract_roles(&c, None), vec!["a", "b"]);
    }

    #[test]
    fn roles_empty_when_no_sources() {
        let c = claims(json!({"sub": "u1"}));
        assert!(extract_roles(&c, Some("client-x")).is_empty());
    }
}
