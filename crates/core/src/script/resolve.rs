//! Second resolver pass over the canonical tree.
//!
//! - every report gets its connections rebuilt from the active session
//!   merged with the user's overrides,
//! - delivery nodes without connections (or with the sentinel) inherit them,
//! - `@name@` placeholders inherit the value from the previous array element,
//! - formula strings get the `$@(` quirk normalized,
//! - flagged output passwords are decrypted.

use serde_json::{Map, Value};

use super::connection::{
    computed_connection, declared_credential_type, merge, CredentialType, SessionContext,
    CONFIG_CONNECTION_SENTINEL,
};
use super::password::PasswordCipher;

/// One step of a path from the root of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Applies the session-dependent rewrites to a normalized script.
pub struct Resolver<'a> {
    pub ctx: &'a SessionContext,
    pub credential_type: CredentialType,
    pub passwords: Option<&'a PasswordCipher>,
}

impl Resolver<'_> {
    /// Run every rewrite over `root` and return the resolved tree.
    pub fn resolve(&self, mut root: Value) -> Value {
        resolve_placeholders(&mut root);

        if let Some(tasks) = root.get_mut("tasks").and_then(Value::as_array_mut) {
            for task in tasks {
                let Some(reports) = task.get_mut("reports").and_then(Value::as_array_mut) else {
                    continue;
                };
                for report in reports.iter_mut().filter_map(Value::as_object_mut) {
                    self.inject_connections(report);
                    self.decrypt_password(report);
                }
            }
        }

        normalize_formulas(&mut root);
        root
    }

    /// Rebuild `report.connections` and hand them to delivery nodes.
    fn inject_connections(&self, report: &mut Map<String, Value>) {
        let declared: Vec<Map<String, Value>> = match report.remove("connections") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => vec![map],
            Some(Value::String(s)) if s == CONFIG_CONNECTION_SENTINEL => vec![Map::new()],
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    Value::String(s) if s == CONFIG_CONNECTION_SENTINEL => Some(Map::new()),
                    other => {
                        tracing::warn!(entry = %other, "Ignoring connection entry that is not an object");
                        None
                    }
                })
                .collect(),
            Some(other) => {
                tracing::warn!(connections = %other, "Ignoring connections that are not an object or list");
                Vec::new()
            }
        };

        let connections: Vec<Value> = if declared.is_empty() {
            vec![computed_connection(self.ctx, self.credential_type)]
        } else {
            declared
                .into_iter()
                .map(|user| {
                    let base = self.computed_for(&user);
                    merge(base, &Value::Object(user))
                })
                .collect()
        };

        if let Some(Value::Object(distribute)) = report.get_mut("distribute") {
            for node in distribute.values_mut() {
                match node {
                    Value::Object(target) => fill_delivery_connections(target, &connections),
                    Value::Array(items) => {
                        for target in items.iter_mut().filter_map(Value::as_object_mut) {
                            fill_delivery_connections(target, &connections);
                        }
                    }
                    _ => {}
                }
            }
        }

        report.insert("connections".into(), Value::Array(connections));
    }

    /// Computed connection matching the credential type the user declared.
    fn computed_for(&self, user: &Map<String, Value>) -> Value {
        let Some(name) = declared_credential_type(user) else {
            return computed_connection(self.ctx, self.credential_type);
        };
        match name.parse::<CredentialType>() {
            Ok(kind) => computed_connection(self.ctx, kind),
            Err(e) => {
                tracing::warn!(error = %e, "Using an empty connection for the unknown type");
                Value::Object(Map::new())
            }
        }
    }

    /// Decrypt `template.outputPassword` when flagged as base64-encrypted.
    fn decrypt_password(&self, report: &mut Map<String, Value>) {
        let Some(cipher) = self.passwords else {
            return;
        };
        let Some(template) = report.get_mut("template").and_then(Value::as_object_mut) else {
            return;
        };
        let Some(password_key) = find_key(template, "outputPassword") else {
            return;
        };
        let Some(flag_key) = find_key(template, "useBase64Password") else {
            return;
        };
        if !template.get(&flag_key).is_some_and(is_truthy) {
            return;
        }
        let Some(encoded) = template.get(&password_key).and_then(Value::as_str) else {
            return;
        };

        match cipher.decrypt(encoded) {
            Ok(plain) => {
                template.insert(password_key, Value::String(plain));
                template.insert(flag_key, Value::Bool(false));
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key_path = %cipher.key_path().display(),
                    "Could not decrypt the output password, passing it through",
                );
            }
        }
    }
}

fn fill_delivery_connections(target: &mut Map<String, Value>, connections: &[Value]) {
    let wants_connections = match target.get("connections") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s == CONFIG_CONNECTION_SENTINEL,
        Some(_) => false,
    };
    if wants_connections {
        target.insert("connections".into(), Value::Array(connections.to_vec()));
    }
}

fn find_key(map: &Map<String, Value>, name: &str) -> Option<String> {
    map.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

/// Replace every `@name@` string whose enclosing property is `name` with the
/// value the previous array element holds at the same relative path.
pub fn resolve_placeholders(root: &mut Value) {
    let mut found = Vec::new();
    collect_placeholders(root, &mut Vec::new(), &mut found);

    let mut substitutions = Vec::with_capacity(found.len());
    for (path, name) in found {
        match lookup_inherited(root, &path, &name) {
            Some(value) => substitutions.push((path, value)),
            None => tracing::warn!(
                path = %pointer(&path),
                placeholder = %name,
                "Placeholder has no previous element to inherit from",
            ),
        }
    }

    for (path, value) in substitutions {
        if let Some(slot) = root.pointer_mut(&pointer(&path)) {
            *slot = value;
        }
    }
}

fn collect_placeholders(node: &Value, path: &mut Vec<Segment>, out: &mut Vec<(Vec<Segment>, String)>) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(Segment::Key(key.clone()));
                collect_placeholders(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(Segment::Index(index));
                collect_placeholders(child, path, out);
                path.pop();
            }
        }
        Value::String(s) => {
            if let Some(name) = placeholder_name(s) {
                if enclosing_property(path) == Some(name) {
                    out.push((path.clone(), name.to_string()));
                }
            }
        }
        _ => {}
    }
}

/// Follow the inheritance chain until a non-placeholder value is found.
fn lookup_inherited(root: &Value, path: &[Segment], name: &str) -> Option<Value> {
    let target = inherited_path(path)?;
    let value = root.pointer(&pointer(&target))?;
    match value.as_str().and_then(placeholder_name) {
        Some(inner) if inner == name => lookup_inherited(root, &target, name),
        _ => Some(value.clone()),
    }
}

/// The same path with its innermost non-zero array index decremented.
///
/// An element at index 0 of an inner array has no predecessor there, so it
/// inherits through the next enclosing array instead: the first report of
/// `tasks[1]` takes its value from the first report of `tasks[0]`.
pub fn inherited_path(path: &[Segment]) -> Option<Vec<Segment>> {
    let position = path
        .iter()
        .rposition(|segment| matches!(segment, Segment::Index(i) if *i > 0))?;
    let mut target = path.to_vec();
    if let Segment::Index(index) = &mut target[position] {
        *index -= 1;
    }
    Some(target)
}

fn placeholder_name(s: &str) -> Option<&str> {
    s.strip_prefix('@')?
        .strip_suffix('@')
        .filter(|name| !name.is_empty() && !name.contains('@'))
}

fn enclosing_property(path: &[Segment]) -> Option<&str> {
    path.iter().rev().find_map(|segment| match segment {
        Segment::Key(key) => Some(key.as_str()),
        Segment::Index(_) => None,
    })
}

/// JSON pointer (RFC 6901) for a path.
pub fn pointer(path: &[Segment]) -> String {
    let mut out = String::new();
    for segment in path {
        out.push('/');
        match segment {
            Segment::Key(key) => out.push_str(&key.replace('~', "~0").replace('/', "~1")),
            Segment::Index(index) => out.push_str(&index.to_string()),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// Normalize the `$@(` quirk in formula strings (those starting with `=`).
pub fn normalize_formulas(node: &mut Value) {
    match node {
        Value::Object(map) => map.values_mut().for_each(normalize_formulas),
        Value::Array(items) => items.iter_mut().for_each(normalize_formulas),
        Value::String(s) if s.starts_with('=') && s.contains("$@(") => {
            *s = s.replace("$@(", "$(");
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::connection::SessionCredential;
    use crate::script::password::tests::key_file;
    use crate::types::UserIdentity;
    use serde_json::json;

    fn context() -> SessionContext {
        SessionContext {
            server_uri: "https://sense.example.com".into(),
            app_id: "app-1".into(),
            user: UserIdentity::new("CORP", "alice"),
            credential: SessionCredential {
                cookie_name: "X-Qlik-Session".into(),
                cookie_value: "abc".into(),
                bearer_token: None,
            },
        }
    }

    fn resolve(tree: Value) -> Value {
        let ctx = context();
        Resolver {
            ctx: &ctx,
            credential_type: CredentialType::Session,
            passwords: None,
        }
        .resolve(tree)
    }

    fn report(tree: &Value) -> &Value {
        &tree["tasks"][0]["reports"][0]
    }

    #[test]
    fn report_without_connections_gets_the_computed_one() {
        let tree = resolve(json!({"tasks": [{"reports": [{"template": {"input": "a.xlsx"}}]}]}));
        let connections = report(&tree)["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0]["app"], "app-1");
        assert_eq!(connections[0]["credentials"]["value"], "abc");
    }

    #[test]
    fn single_user_connection_is_merged_over_the_computed_one() {
        let tree = resolve(json!({"tasks": [{"reports": [{
            "template": {"input": "a.xlsx"},
            "connections": {"app": "other-app", "serverUri": null}
        }]}]}));
        let connections = report(&tree)["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0]["app"], "other-app");
        assert_eq!(connections[0]["serverUri"], "https://sense.example.com");
        assert_eq!(connections[0]["credentials"]["type"], "SESSION");
    }

    #[test]
    fn every_entry_of_a_connection_list_is_merged() {
        let tree = resolve(json!({"tasks": [{"reports": [{
            "template": {"input": "a.xlsx"},
            "connections": [{"app": "one"}, {"app": "two", "lib": "x"}, 42]
        }]}]}));
        let connections = report(&tree)["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0]["app"], "one");
        assert_eq!(connections[1]["app"], "two");
        assert_eq!(connections[1]["lib"], "x");
        assert_eq!(connections[1]["credentials"]["key"], "X-Qlik-Session");
    }

    #[test]
    fn unknown_connection_type_falls_back_to_an_empty_connection() {
        let tree = resolve(json!({"tasks": [{"reports": [{
            "template": {"input": "a.xlsx"},
            "connections": {"credentials": {"type": "KERBEROS"}}
        }]}]}));
        let connection = &report(&tree)["connections"][0];
        assert_eq!(connection, &json!({"credentials": {"type": "KERBEROS"}}));
    }

    #[test]
    fn delivery_nodes_inherit_connections_when_absent_or_sentinel() {
        let tree = resolve(json!({"tasks": [{"reports": [{
            "template": {"input": "a.xlsx"},
            "connections": {"app": "other-app"},
            "distribute": {
                "hub": {"connections": "@CONFIGCONNECTION@", "mode": "Override"},
                "mail": [{"to": "a@example.com"}],
                "file": {"connections": [{"app": "explicit"}]}
            }
        }]}]}));
        let r = report(&tree);
        assert_eq!(r["distribute"]["hub"]["connections"], r["connections"]);
        assert_eq!(r["distribute"]["mail"][0]["connections"], r["connections"]);
        assert_eq!(r["distribute"]["file"]["connections"], json!([{"app": "explicit"}]));
    }

    #[test]
    fn placeholder_inherits_from_previous_array_element() {
        let mut tree = json!({"a": [{"x": 1}, {"x": "@x@"}]});
        resolve_placeholders(&mut tree);
        assert_eq!(tree, json!({"a": [{"x": 1}, {"x": 1}]}));
    }

    #[test]
    fn chained_placeholders_resolve_to_the_first_concrete_value() {
        let mut tree = json!({"a": [{"x": {"k": 1}}, {"x": "@x@"}, {"x": "@x@"}]});
        resolve_placeholders(&mut tree);
        assert_eq!(tree["a"][2]["x"], json!({"k": 1}));
    }

    #[test]
    fn placeholder_in_first_element_is_left_alone() {
        let mut tree = json!({"a": [{"x": "@x@"}]});
        resolve_placeholders(&mut tree);
        assert_eq!(tree, json!({"a": [{"x": "@x@"}]}));
    }

    #[test]
    fn placeholder_naming_another_property_is_left_alone() {
        let mut tree = json!({"a": [{"x": 1}, {"y": "@x@"}]});
        resolve_placeholders(&mut tree);
        assert_eq!(tree["a"][1]["y"], "@x@");
    }

    #[test]
    fn placeholder_in_second_report_inherits_from_first_report() {
        let tree = resolve(json!({"tasks": [{"reports": [
            {"template": {"input": "a.xlsx", "output": "Sales"}},
            {"template": {"input": "b.xlsx", "output": "@output@"}}
        ]}]}));
        assert_eq!(tree["tasks"][0]["reports"][1]["template"]["output"], "Sales");
    }

    #[test]
    fn inherited_path_decrements_the_innermost_nonzero_index() {
        let path = vec![
            Segment::Key("tasks".into()),
            Segment::Index(1),
            Segment::Key("reports".into()),
            Segment::Index(0),
            Segment::Key("x".into()),
        ];
        let target = inherited_path(&path).unwrap();
        assert_eq!(target[1], Segment::Index(0));
        assert_eq!(target[3], Segment::Index(0));
        assert_eq!(pointer(&target), "/tasks/0/reports/0/x");
    }

    #[test]
    fn first_report_of_a_later_task_inherits_from_the_previous_task() {
        let tree = resolve(json!({"tasks": [
            {"reports": [{"template": {"input": "a.xlsx", "output": "Sales"}}]},
            {"reports": [{"template": {"input": "b.xlsx", "output": "@output@"}}]}
        ]}));
        assert_eq!(tree["tasks"][1]["reports"][0]["template"]["output"], "Sales");
    }

    #[test]
    fn pointer_escapes_special_characters() {
        let path = vec![Segment::Key("a/b".into()), Segment::Key("c~d".into())];
        assert_eq!(pointer(&path), "/a~1b/c~0d");
    }

    #[test]
    fn formula_quirk_is_normalized() {
        let mut tree = json!({"f": "=Sum($@(vAmount))", "plain": "$@(keep)"});
        normalize_formulas(&mut tree);
        assert_eq!(tree["f"], "=Sum($(vAmount))");
        assert_eq!(tree["plain"], "$@(keep)");
    }

    #[test]
    fn flagged_password_is_decrypted_and_unflagged() {
        let (_file, cipher) = key_file();
        let sealed = cipher.encrypt("pdf-pass").unwrap();
        let ctx = context();
        let resolver = Resolver {
            ctx: &ctx,
            credential_type: CredentialType::Session,
            passwords: Some(&cipher),
        };
        let tree = resolver.resolve(json!({"tasks": [{"reports": [{
            "template": {"input": "a.xlsx", "OutputPassword": sealed, "useBase64Password": true}
        }]}]}));
        let template = &report(&tree)["template"];
        assert_eq!(template["OutputPassword"], "pdf-pass");
        assert_eq!(template["useBase64Password"], false);
    }

    #[test]
    fn unflagged_password_passes_through() {
        let (_file, cipher) = key_file();
        let ctx = context();
        let resolver = Resolver {
            ctx: &ctx,
            credential_type: CredentialType::Session,
            passwords: Some(&cipher),
        };
        let tree = resolver.resolve(json!({"tasks": [{"reports": [{
            "template": {"input": "a.xlsx", "outputPassword": "plain"}
        }]}]}));
        assert_eq!(report(&tree)["template"]["outputPassword"], "plain");
    }

    #[test]
    fn undecryptable_password_is_left_as_is() {
        let (_file, cipher) = key_file();
        let ctx = context();
        let resolver = Resolver {
            ctx: &ctx,
            credential_type: CredentialType::Session,
            passwords: Some(&cipher),
        };
        let tree = resolver.resolve(json!({"tasks": [{"reports": [{
            "template": {"input": "a.xlsx", "outputPassword": "bm90LXNlYWxlZA==", "useBase64Password": "true"}
        }]}]}));
        assert_eq!(report(&tree)["template"]["outputPassword"], "bm90LXNlYWxlZA==");
    }
}
