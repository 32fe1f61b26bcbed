use serde_json::Value;

/// A name-remapping entry carried by a rule definition: within repository
/// `from`, the apparent name `alias` points at the canonical repository `to`.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMapping {
    pub from: String,
    pub alias: String,
    pub to: String,
}

impl RepoMapping {
    pub fn new(
        from: impl Into<String>,
        alias: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            alias: alias.into(),
            to: to.into(),
        }
    }
}

/// The definition of one repository rule: what kind of rule it is, where it
/// was defined, and which external facts its implementation is allowed to
/// read. The implementation itself stays behind the `RuleExecutor` seam.
///
#[derive(Builder, Debug, Clone)]
pub struct RepoRule {
    /// The rule kind, e.g. `http_archive`.
    #[builder(setter(into))]
    name: String,

    /// Human-readable location of the rule definition, used in diagnostics.
    #[builder(setter(into), default)]
    definition_info: String,

    /// Environment variables the rule declares as inputs. Each one becomes a
    /// dependency of the fetch and a fingerprint entry.
    #[builder(default)]
    environ: Vec<String>,

    /// File labels the rule will read. These are resolved before the rule
    /// runs, so that any missing one restarts the computation before side
    /// effects begin.
    #[builder(default)]
    label_attrs: Vec<String>,

    /// The rule's attributes, kept opaque. They describe how the call would
    /// have to be modified to be reproducible.
    #[builder(default)]
    attrs: serde_json::Map<String, Value>,

    /// Name-remapping entries inherited from the rule definition site.
    #[builder(default)]
    definition_mappings: Vec<RepoMapping>,

    /// Local rules only touch the local filesystem and are cheap enough to
    /// refetch eagerly. The engine's caching policy keys off this.
    #[builder(default = "false")]
    local: bool,

    /// Configure rules inspect the host system and are refetched when the
    /// engine is asked to re-configure.
    #[builder(default = "false")]
    configure: bool,
}

impl RepoRule {
    pub fn builder() -> RepoRuleBuilder {
        RepoRuleBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition_info(&self) -> &str {
        &self.definition_info
    }

    pub fn environ(&self) -> &[String] {
        &self.environ
    }

    pub fn label_attrs(&self) -> &[String] {
        &self.label_attrs
    }

    pub fn attrs(&self) -> &serde_json::Map<String, Value> {
        &self.attrs
    }

    pub fn definition_mappings(&self) -> &[RepoMapping] {
        &self.definition_mappings
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_configure(&self) -> bool {
        self.configure
    }
}
