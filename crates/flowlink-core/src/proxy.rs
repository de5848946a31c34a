// ── Dynamic datamodel proxies ──
//
// Three cooperating views over the remote schema: ObjectProxy for
// singleton/instance nodes, NamedContainerProxy for creatable collections,
// CommandProxy for invocable operations. Proxies are cheap, stateless,
// recreate-on-demand — identity is (session, rules, path), state lives on
// the server, and the only client-side memory is the session's caches.

use std::sync::Arc;

use serde_json::Value;

use crate::error::CoreError;
use crate::path::{Path, to_client_name, to_server_name};
use crate::session::Session;
use crate::variant;

/// Name of the state field holding a named-object instance's mutable,
/// human-facing display name.
const DISPLAY_NAME_FIELD: &str = "_name_";

// ── Attributes ───────────────────────────────────────────────────────

/// Well-known node attributes, queryable per (path, attribute).
///
/// Attribute names cross the wire verbatim (camelCase); they are not part
/// of the schema namespace and never case-converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[strum(serialize_all = "camelCase")]
pub enum NodeAttribute {
    IsActive,
    IsReadOnly,
    Default,
    Min,
    Max,
    AllowedValues,
    ExcludedValues,
    DisplayText,
    ToolTip,
    Members,
    Names,
    Paths,
}

// ── Child classification ─────────────────────────────────────────────

/// Result of resolving a child name against a node's schema.
///
/// The explicit tagged result replaces attribute-miss interception:
/// callers name what they want and get back a typed proxy.
#[derive(Debug)]
pub enum ChildKind {
    /// A singleton child node.
    Singleton(ObjectProxy),
    /// The collection of instances of a creatable named-object type.
    Collection(NamedContainerProxy),
    /// An invocable command on this node.
    Command(CommandProxy),
}

// ── ObjectProxy ──────────────────────────────────────────────────────

/// A single server-side node (singleton or named-object instance).
#[derive(Clone)]
pub struct ObjectProxy {
    session: Session,
    rules: Arc<str>,
    path: Path,
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("rules", &self.rules)
            .field("path", &self.path.to_wire())
            .finish_non_exhaustive()
    }
}

impl ObjectProxy {
    pub(crate) fn new(session: Session, rules: Arc<str>, path: Path) -> Self {
        Self { session, rules, path }
    }

    pub fn rules(&self) -> &str {
        &self.rules
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a child name (client convention) against this node's specs.
    ///
    /// Classifies into exactly one of singleton / collection / command;
    /// an unknown name fails with the attempted name and this node's wire
    /// path so deep dynamic chains stay debuggable.
    ///
    /// The converted server name is tried first, then the verbatim name —
    /// some rules namespaces keep snake_case schema identifiers. The path
    /// segment always takes the schema's own spelling, so wire paths match
    /// what the server advertised.
    pub async fn resolve(&self, name: &str) -> Result<ChildKind, CoreError> {
        let server = to_server_name(name);
        let hit = |candidate: &str| candidate == server || candidate == name;
        let specs = self.session.specs(&self.rules, &self.path).await?;

        let Some(st) = specs.struct_specs() else {
            return Err(CoreError::not_found(name, self.path.to_wire()));
        };

        if let Some(cmd) = st.commands.iter().find(|c| hit(&c.name)) {
            return Ok(ChildKind::Command(CommandProxy {
                session: self.session.clone(),
                rules: Arc::clone(&self.rules),
                path: self.path.clone(),
                command: cmd.name.clone(),
            }));
        }

        for member in &st.members {
            match member.split_once(':') {
                // A `<Type>:<raw-key>` member is one existing instance of
                // a named-object type.
                Some((base, _)) if hit(base) => {
                    return Ok(ChildKind::Collection(NamedContainerProxy {
                        session: self.session.clone(),
                        rules: Arc::clone(&self.rules),
                        path: self.path.child(base),
                    }));
                }
                None if hit(member) => {
                    return Ok(ChildKind::Singleton(ObjectProxy {
                        session: self.session.clone(),
                        rules: Arc::clone(&self.rules),
                        path: self.path.child(member.as_str()),
                    }));
                }
                _ => {}
            }
        }

        // Creatable types are addressable before any instance exists, in
        // which case no `<Type>:<raw-key>` member has materialized yet.
        if let Some(ty) = st.creatable_types.iter().find(|t| hit(t)) {
            return Ok(ChildKind::Collection(NamedContainerProxy {
                session: self.session.clone(),
                rules: Arc::clone(&self.rules),
                path: self.path.child(ty.as_str()),
            }));
        }

        Err(CoreError::not_found(name, self.path.to_wire()))
    }

    /// Resolve a name, requiring a singleton or instance child.
    pub async fn child(&self, name: &str) -> Result<ObjectProxy, CoreError> {
        match self.resolve(name).await? {
            ChildKind::Singleton(proxy) => Ok(proxy),
            _ => Err(CoreError::not_found(name, self.path.to_wire())),
        }
    }

    /// Resolve a name, requiring a named-object collection.
    pub async fn collection(&self, name: &str) -> Result<NamedContainerProxy, CoreError> {
        match self.resolve(name).await? {
            ChildKind::Collection(proxy) => Ok(proxy),
            _ => Err(CoreError::not_found(name, self.path.to_wire())),
        }
    }

    /// Resolve a name, requiring a command.
    pub async fn command(&self, name: &str) -> Result<CommandProxy, CoreError> {
        match self.resolve(name).await? {
            ChildKind::Command(proxy) => Ok(proxy),
            _ => Err(CoreError::not_found(name, self.path.to_wire())),
        }
    }

    /// Read this node's state, decoded with key conversion.
    pub async fn get_state(&self) -> Result<Value, CoreError> {
        self.session.state(&self.rules, &self.path).await
    }

    /// Write this node's state.
    pub async fn set_state(&self, state: &Value) -> Result<(), CoreError> {
        let wire = self.path.to_wire();
        self.session
            .service()
            .set_state(&self.rules, &wire, variant::encode(state, true))
            .await?;
        // Local invalidation keeps read-your-writes sane even before the
        // corresponding Modified event arrives (ordering is not guaranteed).
        self.session.cache().invalidate(&self.rules, &wire);
        Ok(())
    }

    /// Read one attribute of this node. The attribute name goes over the
    /// wire as-is, and the value decodes without key conversion.
    pub async fn get_attribute_value(&self, attribute: &str) -> Result<Value, CoreError> {
        let result = self
            .session
            .service()
            .get_attribute_value(&self.rules, &self.path.to_wire(), attribute)
            .await?;
        Ok(variant::decode(&result, false))
    }

    /// Read a well-known attribute.
    pub async fn attribute(&self, attr: NodeAttribute) -> Result<Value, CoreError> {
        self.get_attribute_value(attr.as_ref()).await
    }

    /// Every child name reachable from this node, client convention:
    /// singleton children, creatable types, then commands. Introspection
    /// aid (autocompletion), not data iteration.
    pub async fn child_names(&self) -> Result<Vec<String>, CoreError> {
        let specs = self.session.specs(&self.rules, &self.path).await?;
        let Some(st) = specs.struct_specs() else {
            return Ok(Vec::new());
        };

        let mut names: Vec<String> = st
            .members
            .iter()
            .filter(|m| !m.contains(':'))
            .map(|m| to_client_name(m))
            .collect();
        names.extend(st.creatable_types.iter().map(|t| to_client_name(t)));
        names.extend(st.commands.iter().map(|c| to_client_name(&c.name)));
        Ok(names)
    }

    /// This node's help string. Help text is immutable per node class for
    /// the session, so it is memoized session-wide; racing fetches at
    /// worst duplicate one RPC.
    pub async fn help(&self) -> Result<Arc<str>, CoreError> {
        let class = self.path.last().map_or("", |seg| seg.component.as_str());
        self.session.node_help(&self.rules, class, &self.path).await
    }
}

// ── NamedContainerProxy ──────────────────────────────────────────────

/// The collection of same-typed named-object instances under a node.
///
/// The public interface speaks *display names* — the mutable `_name_`
/// state field of each instance. Raw structural keys (from the parent's
/// member list) are only used internally to reach `_name_`; they are not
/// valid lookup keys.
#[derive(Clone)]
pub struct NamedContainerProxy {
    session: Session,
    rules: Arc<str>,
    /// Path whose final segment names the collection type, instance empty.
    path: Path,
}

impl std::fmt::Debug for NamedContainerProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedContainerProxy")
            .field("rules", &self.rules)
            .field("path", &self.path.to_wire())
            .finish_non_exhaustive()
    }
}

impl NamedContainerProxy {
    pub fn rules(&self) -> &str {
        &self.rules
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn type_name(&self) -> &str {
        self.path.last().map_or("", |seg| seg.component.as_str())
    }

    fn parent_path(&self) -> Path {
        self.path.parent().unwrap_or_default()
    }

    /// Raw structural keys, from `<Type>:<key>` members of the parent.
    async fn raw_keys(&self) -> Result<Vec<String>, CoreError> {
        let parent = self.parent_path();
        let specs = self.session.specs(&self.rules, &parent).await?;
        let prefix = format!("{}:", self.type_name());

        Ok(specs
            .struct_specs()
            .map(|st| {
                st.members
                    .iter()
                    .filter_map(|m| m.strip_prefix(&prefix))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// (display name, raw key) for every instance. The display name is a
    /// state field and may differ from the raw key; when `_name_` is
    /// missing the raw key doubles as the display name.
    async fn entries(&self) -> Result<Vec<(String, String)>, CoreError> {
        let parent = self.parent_path();
        let ty = self.type_name().to_owned();
        let mut entries = Vec::new();

        for raw in self.raw_keys().await? {
            let name_path = parent.instance(&ty, &raw).child(DISPLAY_NAME_FIELD);
            let v = self
                .session
                .service()
                .get_state(&self.rules, &name_path.to_wire())
                .await?;
            let display = match variant::decode(&v, true) {
                Value::String(s) => s,
                _ => raw.clone(),
            };
            entries.push((display, raw));
        }
        Ok(entries)
    }

    /// Display names of all instances.
    pub async fn names(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.entries().await?.into_iter().map(|(d, _)| d).collect())
    }

    pub async fn len(&self) -> Result<usize, CoreError> {
        Ok(self.raw_keys().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, CoreError> {
        Ok(self.raw_keys().await?.is_empty())
    }

    pub async fn contains(&self, display_name: &str) -> Result<bool, CoreError> {
        Ok(self.names().await?.iter().any(|n| n == display_name))
    }

    fn instance_proxy(&self, display_name: &str) -> ObjectProxy {
        let path = self.parent_path().instance(self.type_name(), display_name);
        ObjectProxy::new(self.session.clone(), Arc::clone(&self.rules), path)
    }

    /// One `ObjectProxy` per instance, addressed by display name.
    pub async fn instances(&self) -> Result<Vec<ObjectProxy>, CoreError> {
        Ok(self
            .names()
            .await?
            .iter()
            .map(|name| self.instance_proxy(name))
            .collect())
    }

    /// Look up an instance by display name.
    pub async fn get(&self, display_name: &str) -> Result<ObjectProxy, CoreError> {
        if !self.contains(display_name).await? {
            return Err(CoreError::not_found(display_name, self.path.to_wire()));
        }
        Ok(self.instance_proxy(display_name))
    }

    /// Assign state to an instance, creating it server-side if absent.
    ///
    /// One code path for both cases: set-state on a non-existent
    /// named-object path is documented to create it. The client never
    /// pre-creates; a server that rejects the write surfaces that as a
    /// solver error.
    pub async fn set(&self, display_name: &str, state: &Value) -> Result<(), CoreError> {
        let proxy = self.instance_proxy(display_name);
        proxy.set_state(state).await?;
        // The parent's member list may have grown.
        self.session
            .cache()
            .invalidate(&self.rules, &self.parent_path().to_wire());
        Ok(())
    }

    /// Delete an instance by display name.
    pub async fn delete(&self, display_name: &str) -> Result<(), CoreError> {
        if !self.contains(display_name).await? {
            return Err(CoreError::not_found(display_name, self.path.to_wire()));
        }
        let path = self.parent_path().instance(self.type_name(), display_name);
        self.session
            .service()
            .delete_object(&self.rules, &path.to_wire())
            .await?;
        self.session
            .cache()
            .invalidate(&self.rules, &self.parent_path().to_wire());
        Ok(())
    }

    /// Help string for this collection's node class.
    pub async fn help(&self) -> Result<Arc<str>, CoreError> {
        let class = self.type_name().to_owned();
        self.session.node_help(&self.rules, &class, &self.path).await
    }
}

// ── CommandProxy ─────────────────────────────────────────────────────

/// An invocable remote operation bound to (owning path, command name).
#[derive(Clone)]
pub struct CommandProxy {
    session: Session,
    rules: Arc<str>,
    /// Path of the node owning the command.
    path: Path,
    /// Command name, server convention.
    command: String,
}

impl std::fmt::Debug for CommandProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProxy")
            .field("rules", &self.rules)
            .field("path", &self.path.to_wire())
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl CommandProxy {
    pub fn rules(&self) -> &str {
        &self.rules
    }

    pub fn owning_path(&self) -> &Path {
        &self.path
    }

    /// Command name in server convention.
    pub fn name(&self) -> &str {
        &self.command
    }

    /// Invoke with keyword arguments (an object value, client-convention
    /// keys). Argument names live in the schema namespace, so keys ARE
    /// converted — unlike attribute values.
    pub async fn invoke(&self, args: &Value) -> Result<Value, CoreError> {
        let result = self
            .session
            .service()
            .execute_command(
                &self.rules,
                &self.path.to_wire(),
                &self.command,
                variant::encode(args, true),
            )
            .await?;
        Ok(variant::decode(&result, true))
    }

    /// This command's help string, memoized like node help.
    pub async fn help(&self) -> Result<Arc<str>, CoreError> {
        self.session
            .command_help(&self.rules, &self.path, &self.command)
            .await
    }
}
