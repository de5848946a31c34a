//! Wire types for the StateEngine datamodel service.
//!
//! Every state value, command argument, and command result crosses the wire
//! as a [`Variant`] — a tagged union mirroring the service's oneof. Requests
//! carry a rules namespace plus a flat wire path (`/Comp/Type:inst` form);
//! the path grammar itself lives in `flowlink-core`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Variant ──────────────────────────────────────────────────────────

/// Tagged wire value used uniformly for state and command payloads.
///
/// At most one branch is populated. A `Variant` with no populated branch
/// is the wire form of "empty" — an unset optional field — and decodes to
/// null rather than erroring. The list and map branches are wrapped in
/// structs so that an empty sequence is still *present* on the wire,
/// distinguishable from an absent field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_value: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_value: Option<VariantList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_value: Option<VariantMap>,
}

/// Heterogeneous sequence branch of [`Variant`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariantList {
    #[serde(default)]
    pub items: Vec<Variant>,
}

/// String-keyed mapping branch of [`Variant`]. Insertion order is not
/// meaningful, so a sorted map keeps serialization deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariantMap {
    #[serde(default)]
    pub entries: BTreeMap<String, Variant>,
}

impl Variant {
    /// A `Variant` with no populated branch.
    pub fn empty() -> Self {
        Self::default()
    }

    /// `true` if no branch is populated.
    pub fn is_empty(&self) -> bool {
        self.bool_value.is_none()
            && self.int_value.is_none()
            && self.double_value.is_none()
            && self.string_value.is_none()
            && self.list_value.is_none()
            && self.map_value.is_none()
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Self { bool_value: Some(v), ..Self::default() }
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Self { int_value: Some(v), ..Self::default() }
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Self { double_value: Some(v), ..Self::default() }
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Self { string_value: Some(v.to_owned()), ..Self::default() }
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Self { string_value: Some(v), ..Self::default() }
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(items: Vec<Variant>) -> Self {
        Self {
            list_value: Some(VariantList { items }),
            ..Self::default()
        }
    }
}

impl From<BTreeMap<String, Variant>> for Variant {
    fn from(entries: BTreeMap<String, Variant>) -> Self {
        Self {
            map_value: Some(VariantMap { entries }),
            ..Self::default()
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeDatamodelRequest {
    pub rules: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSpecsRequest {
    pub rules: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStateRequest {
    pub rules: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStateRequest {
    pub rules: String,
    pub path: String,
    pub state: Variant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteObjectRequest {
    pub rules: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandRequest {
    pub rules: String,
    pub path: String,
    pub command: String,
    /// Keyword arguments as a map-branch `Variant`.
    pub args: Variant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAttributeValueRequest {
    pub rules: String,
    pub path: String,
    /// Attribute name, passed verbatim — attribute names are not
    /// schema-namespaced and never case-converted.
    pub attribute: String,
}

// ── Responses ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStateResponse {
    #[serde(default)]
    pub state: Variant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAttributeValueResponse {
    #[serde(default)]
    pub result: Variant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandResponse {
    #[serde(default)]
    pub result: Variant,
}

/// Schema description for a single path, as returned by `get-specs`.
///
/// Exactly one of the struct kinds is populated for struct nodes; both are
/// absent for leaves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singleton: Option<StructSpecs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_object: Option<StructSpecs>,
}

impl SpecsResponse {
    /// Whichever struct kind the response populates, if any.
    pub fn struct_specs(&self) -> Option<&StructSpecs> {
        self.singleton.as_ref().or(self.named_object.as_ref())
    }

    /// The node's common help string, read from the populated struct kind.
    pub fn common_help(&self) -> Option<&str> {
        self.struct_specs().and_then(|s| s.help.as_deref())
    }
}

/// Member/command listing for a struct node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructSpecs {
    /// Member names in server convention. Plain members are singleton
    /// children; each existing named-object instance appears as
    /// `"<Type>:<raw-key>"` (`"VelocityInlet:1"`).
    #[serde(default)]
    pub members: Vec<String>,

    /// Named-object types creatable under this node.
    #[serde(default)]
    pub creatable_types: Vec<String>,

    /// Commands invocable at this node.
    #[serde(default)]
    pub commands: Vec<CommandSpec>,

    /// Help text shared by every instance of this node class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

/// Descriptor for a single command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

// ── Tests ────────────────────────────────────────────────────────────
