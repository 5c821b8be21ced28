use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Bootstrap payload published by the server.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiDocument {
    /// Callable surface.
    #[serde(default)]
    pub api: Vec<ActionDescriptor>,
    /// Server ECDH public key (base64 SPKI or SEC1 point).
    #[serde(rename = "keyEnc", default, skip_serializing_if = "Option::is_none")]
    pub key_enc: Option<String>,
    /// Server ECDSA verification key (base64 SPKI or SEC1 point).
    #[serde(rename = "keyVer", default, skip_serializing_if = "Option::is_none")]
    pub key_ver: Option<String>,
    /// Signature over `nonce + keyEnc + keyVer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ApiDocument {
    /// True if the server sent key material to verify.
    pub fn has_security_material(&self) -> bool {
        self.signature.is_some()
    }

    /// Total number of method declarations across all actions.
    pub fn method_count(&self) -> usize {
        self.api.iter().map(|action| action.methods.len()).sum()
    }
}

impl fmt::Debug for ApiDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("ApiDocument");
        dbg.field("api", &self.api)
            .field("key_enc", &self.key_enc)
            .field("key_ver", &self.key_ver);
        if let Some(signature) = &self.signature {
            dbg.field(
                "signature",
                &format_args!("<redacted:{} bytes>", signature.len()),
            );
        } else {
            dbg.field("signature", &Option::<String>::None);
        }
        dbg.finish()
    }
}

/// One server-side action and its methods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionDescriptor {
    /// Dotted namespace path, e.g. `io.greenscreens`.
    pub namespace: String,
    /// Action (class) name.
    pub action: String,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl ActionDescriptor {
    /// `namespace.action`
    pub fn path(&self) -> String {
        format!("{}.{}", self.namespace, self.action)
    }
}

/// One declared method. Several descriptors may share a name with
/// different arities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    #[serde(alias = "len", default)]
    pub arity: Arity,
    #[serde(rename = "async", default)]
    pub is_async: AsyncFlag,
    #[serde(default = "default_encrypt")]
    pub encrypt: bool,
}

fn default_encrypt() -> bool {
    true
}

/// Declared argument count(s).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Arity {
    One(usize),
    Many(Vec<usize>),
}

impl Default for Arity {
    fn default() -> Self {
        Arity::One(0)
    }
}

impl Arity {
    pub fn values(&self) -> Vec<usize> {
        match self {
            Arity::One(n) => vec![*n],
            Arity::Many(list) => list.clone(),
        }
    }
}

/// Whether a call skips the default timeout.
///
/// Either one flag for every arity or a map keyed by arity (as a string).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AsyncFlag {
    All(bool),
    PerArity(BTreeMap<String, bool>),
}

impl Default for AsyncFlag {
    fn default() -> Self {
        AsyncFlag::All(false)
    }
}

/// Per-arity call behavior after consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArityInfo {
    pub is_async: bool,
    pub encrypt: bool,
}

/// All declarations of one method name merged together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    pub arities: BTreeMap<usize, ArityInfo>,
}

impl MethodSignature {
    pub fn accepts(&self, argc: usize) -> bool {
        self.arities.contains_key(&argc)
    }

    pub fn arity(&self, argc: usize) -> Option<ArityInfo> {
        self.arities.get(&argc).copied()
    }

    /// Declared arities, ascending.
    pub fn arity_list(&self) -> Vec<usize> {
        self.arities.keys().copied().collect()
    }
}

/// An action with consolidated methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSignature {
    pub namespace: String,
    pub action: String,
    pub methods: BTreeMap<String, MethodSignature>,
}

impl ActionSignature {
    /// Dotted path segments: namespace parts followed by the action.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.namespace
            .split('.')
            .chain(std::iter::once(self.action.as_str()))
    }
}

/// Merge descriptors into one signature per `namespace.action`, with
/// same-name overloads folded together.
///
/// A method that declares the same arity twice fails the whole batch with
/// [`SchemaError::DuplicateArity`].
pub fn consolidate(descriptors: &[ActionDescriptor]) -> Result<Vec<ActionSignature>> {
    let mut actions: BTreeMap<(String, String), ActionSignature> = BTreeMap::new();

    for descriptor in descriptors {
        check_path(descriptor)?;

        let entry = actions
            .entry((descriptor.namespace.clone(), descriptor.action.clone()))
            .or_insert_with(|| ActionSignature {
                namespace: descriptor.namespace.clone(),
                action: descriptor.action.clone(),
                methods: BTreeMap::new(),
            });

        for method in &descriptor.methods {
            let path = format!("{}.{}", descriptor.path(), method.name);
            if method.name.is_empty() || method.name.contains('.') {
                return Err(SchemaError::InvalidDescriptor {
                    path,
                    reason: "method name must be a non-empty identifier".to_string(),
                });
            }

            let signature = entry
                .methods
                .entry(method.name.clone())
                .or_insert_with(|| MethodSignature {
                    name: method.name.clone(),
                    arities: BTreeMap::new(),
                });

            let declared = method.arity.values();
            let async_map = async_by_arity(&path, &method.is_async, &declared)?;
            for arity in declared {
                let info = ArityInfo {
                    is_async: async_map.get(&arity).copied().unwrap_or(false),
                    encrypt: method.encrypt,
                };
                if signature.arities.insert(arity, info).is_some() {
                    return Err(SchemaError::DuplicateArity { path, arity });
                }
            }
        }
    }

    Ok(actions.into_values().collect())
}

fn check_path(descriptor: &ActionDescriptor) -> Result<()> {
    let bad_namespace = descriptor.namespace.is_empty()
        || descriptor.namespace.split('.').any(str::is_empty);
    if bad_namespace {
        return Err(SchemaError::InvalidDescriptor {
            path: descriptor.path(),
            reason: "namespace must be a dotted path of non-empty segments".to_string(),
        });
    }
    if descriptor.action.is_empty() || descriptor.action.contains('.') {
        return Err(SchemaError::InvalidDescriptor {
            path: descriptor.path(),
            reason: "action must be a non-empty identifier".to_string(),
        });
    }
    Ok(())
}

fn async_by_arity(
    path: &str,
    flag: &AsyncFlag,
    declared: &[usize],
) -> Result<BTreeMap<usize, bool>> {
    match flag {
        AsyncFlag::All(all) => Ok(declared.iter().map(|arity| (*arity, *all)).collect()),
        AsyncFlag::PerArity(map) => {
            let mut parsed: BTreeMap<usize, bool> =
                declared.iter().map(|arity| (*arity, false)).collect();
            for (key, value) in map {
                let arity: usize = key.parse().map_err(|_| SchemaError::InvalidDescriptor {
                    path: path.to_string(),
                    reason: format!("async key '{key}' is not an arity"),
                })?;
                match parsed.get_mut(&arity) {
                    Some(slot) => *slot = *value,
                    None => {
                        return Err(SchemaError::InvalidDescriptor {
                            path: path.to_string(),
                            reason: format!("async key {arity} is not a declared arity"),
                        })
                    }
                }
            }
            Ok(parsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn descriptors(value: serde_json::Value) -> Vec<ActionDescriptor> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn len_is_accepted_as_arity() {
        let method: MethodDescriptor =
            serde_json::from_value(json!({"name": "hello", "len": 1})).unwrap();
        assert_eq!(method.arity, Arity::One(1));
        assert!(method.encrypt);
        assert_eq!(method.is_async, AsyncFlag::All(false));
    }

    #[test]
    fn encrypt_false_is_kept() {
        let method: MethodDescriptor =
            serde_json::from_value(json!({"name": "ping", "arity": 0, "encrypt": false})).unwrap();
        assert!(!method.encrypt);
    }

    #[test]
    fn document_field_names() {
        let doc: ApiDocument = serde_json::from_value(json!({
            "api": [],
            "keyEnc": "a",
            "keyVer": "b",
            "signature": "c"
        }))
        .unwrap();
        assert_eq!(doc.key_enc.as_deref(), Some("a"));
        assert_eq!(doc.key_ver.as_deref(), Some("b"));
        assert!(doc.has_security_material());
    }

    #[test]
    fn debug_redacts_signature() {
        let doc = ApiDocument {
            signature: Some("secret-signature".to_string()),
            ..ApiDocument::default()
        };
        let text = format!("{doc:?}");
        assert!(!text.contains("secret-signature"));
        assert!(text.contains("<redacted:16 bytes>"));
    }

    #[test]
    fn overloads_merge_into_one_signature() {
        let actions = consolidate(&descriptors(json!([{
            "namespace": "io.greenscreens",
            "action": "Demo",
            "methods": [
                {"name": "hello", "len": 1},
                {"name": "hello", "len": 2, "async": true, "encrypt": false}
            ]
        }])))
        .unwrap();

        assert_eq!(actions.len(), 1);
        let hello = &actions[0].methods["hello"];
        assert_eq!(hello.arity_list(), vec![1, 2]);
        assert_eq!(
            hello.arity(1),
            Some(ArityInfo {
                is_async: false,
                encrypt: true
            })
        );
        assert_eq!(
            hello.arity(2),
            Some(ArityInfo {
                is_async: true,
                encrypt: false
            })
        );
        assert!(!hello.accepts(3));
    }

    #[test]
    fn descriptors_for_same_action_merge() {
        let actions = consolidate(&descriptors(json!([
            {"namespace": "a.b", "action": "C", "methods": [{"name": "x", "arity": 0}]},
            {"namespace": "a.b", "action": "C", "methods": [{"name": "y", "arity": 1}]}
        ])))
        .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].methods.len(), 2);
    }

    #[test]
    fn duplicate_arity_is_rejected() {
        let err = consolidate(&descriptors(json!([{
            "namespace": "io.greenscreens",
            "action": "Demo",
            "methods": [
                {"name": "hello", "len": 1},
                {"name": "hello", "arity": [1, 3]}
            ]
        }])))
        .unwrap_err();

        match err {
            SchemaError::DuplicateArity { path, arity } => {
                assert_eq!(path, "io.greenscreens.Demo.hello");
                assert_eq!(arity, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn per_arity_async_map() {
        let actions = consolidate(&descriptors(json!([{
            "namespace": "n",
            "action": "A",
            "methods": [{"name": "m", "arity": [0, 2], "async": {"2": true}}]
        }])))
        .unwrap();
        let m = &actions[0].methods["m"];
        assert!(!m.arity(0).unwrap().is_async);
        assert!(m.arity(2).unwrap().is_async);
    }

    #[test]
    fn async_key_must_be_declared_arity() {
        let err = consolidate(&descriptors(json!([{
            "namespace": "n",
            "action": "A",
            "methods": [{"name": "m", "arity": 1, "async": {"4": true}}]
        }])))
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDescriptor { .. }));
    }

    #[test]
    fn empty_namespace_segment_is_rejected() {
        let err = consolidate(&descriptors(json!([{
            "namespace": "io..greenscreens",
            "action": "Demo",
            "methods": []
        }])))
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDescriptor { .. }));
    }

    #[test]
    fn segments_include_action() {
        let actions = consolidate(&descriptors(json!([
            {"namespace": "io.greenscreens", "action": "Demo", "methods": []}
        ])))
        .unwrap();
        let segments: Vec<&str> = actions[0].segments().collect();
        assert_eq!(segments, vec!["io", "greenscreens", "Demo"]);
    }
}
