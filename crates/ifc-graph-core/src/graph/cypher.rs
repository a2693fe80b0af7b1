//! Cypher statements for the graph store primitives

use super::{
    EdgeUpsert, NodeDomain, NodeRef, NodeUpsert, PropertyMap, PropertyMerge, PropertyValue, SchemaItem,
    UNRESOLVED_LABEL,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// A parameterized Cypher statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    /// Query text
    pub query: String,
    /// Named parameters
    pub params: Map<String, Value>,
}

/// Incremental statement builder
#[derive(Debug, Clone, Default)]
pub struct StatementBuilder {
    parts: Vec<String>,
    params: Map<String, Value>,
}

impl StatementBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a MATCH clause
    pub fn match_(mut self, pattern: &str) -> Self {
        self.parts.push(format!("MATCH {pattern}"));
        self
    }

    /// Add a MERGE clause
    pub fn merge(mut self, pattern: &str) -> Self {
        self.parts.push(format!("MERGE {pattern}"));
        self
    }

    /// Add an ON CREATE SET clause
    pub fn on_create_set(mut self, assignments: &str) -> Self {
        self.parts.push(format!("ON CREATE SET {assignments}"));
        self
    }

    /// Add a WHERE clause
    pub fn where_(mut self, condition: &str) -> Self {
        self.parts.push(format!("WHERE {condition}"));
        self
    }

    /// Add a SET clause
    pub fn set(mut self, assignments: &str) -> Self {
        self.parts.push(format!("SET {assignments}"));
        self
    }

    /// Add a REMOVE clause
    pub fn remove(mut self, items: &str) -> Self {
        self.parts.push(format!("REMOVE {items}"));
        self
    }

    /// Add a DELETE clause
    pub fn delete(mut self, items: &str) -> Self {
        self.parts.push(format!("DELETE {items}"));
        self
    }

    /// Add a DETACH DELETE clause
    pub fn detach_delete(mut self, items: &str) -> Self {
        self.parts.push(format!("DETACH DELETE {items}"));
        self
    }

    /// Add a RETURN clause
    pub fn return_(mut self, items: &str) -> Self {
        self.parts.push(format!("RETURN {items}"));
        self
    }

    /// Add a raw clause
    pub fn raw(mut self, clause: impl Into<String>) -> Self {
        self.parts.push(clause.into());
        self
    }

    /// Bind a parameter
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Finish the statement
    pub fn build(self) -> Statement {
        Statement {
            query: self.parts.join(" "),
            params: self.params,
        }
    }
}

/// Backtick-quote an identifier
pub fn quote(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

fn to_json(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Int(i) => Value::from(*i),
        PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        PropertyValue::String(s) => Value::String(s.clone()),
        PropertyValue::List(items) => Value::Array(items.iter().map(to_json).collect()),
    }
}

/// Encode a property map as a JSON object parameter
pub fn properties_param(properties: &PropertyMap) -> Value {
    Value::Object(
        properties
            .iter()
            .map(|(k, v)| (k.clone(), to_json(v)))
            .collect(),
    )
}

fn node_pattern(var: &str, domain: NodeDomain, key_param: &str) -> String {
    format!(
        "({var}:{} {{{}: ${key_param}}})",
        quote(domain.label()),
        quote(domain.key_property())
    )
}

/// `MERGE` a node, replace or extend its properties and add its labels
pub fn merge_node(node: &NodeUpsert) -> Statement {
    let mut properties = node.properties.clone();
    properties.insert(
        node.node.domain.key_property().to_string(),
        PropertyValue::String(node.node.key.clone()),
    );

    let props = match node.merge {
        PropertyMerge::Replace => "n = $props",
        PropertyMerge::Extend => "n += $props",
    };
    let mut assignments = vec![props.to_string()];
    for label in &node.labels {
        assignments.push(format!("n:{}", quote(label)));
    }

    StatementBuilder::new()
        .merge(&node_pattern("n", node.node.domain, "key"))
        .remove(&format!("n:{}", quote(UNRESOLVED_LABEL)))
        .set(&assignments.join(", "))
        .param("key", node.node.key.clone())
        .param("props", properties_param(&properties))
        .build()
}

/// `MERGE` a placeholder node, leaving an existing node untouched.
/// Returns `created` = true when the node was new.
pub fn ensure_node(node: &NodeRef) -> Statement {
    StatementBuilder::new()
        .merge(&node_pattern("n", node.domain, "key"))
        .on_create_set(&format!("n:{}, n.`_placeholder` = true", quote(UNRESOLVED_LABEL)))
        .raw("WITH n, n.`_placeholder` AS created")
        .remove("n.`_placeholder`")
        .return_("coalesce(created, false) AS created")
        .param("key", node.key.clone())
        .build()
}

/// `MATCH` both endpoints, `MERGE` the edge and replace its properties
pub fn merge_edge(edge: &EdgeUpsert) -> Statement {
    StatementBuilder::new()
        .match_(&node_pattern("a", edge.source.domain, "source"))
        .match_(&node_pattern("b", edge.target.domain, "target"))
        .merge(&format!("(a)-[r:{}]->(b)", quote(&edge.rel_type)))
        .set("r = $props")
        .return_("count(r) AS count")
        .param("source", edge.source.key.clone())
        .param("target", edge.target.key.clone())
        .param("props", properties_param(&edge.properties))
        .build()
}

/// Delete edges carrying a property value
pub fn delete_edges_where(property: &str, value: &PropertyValue) -> Statement {
    StatementBuilder::new()
        .match_("()-[r]->()")
        .where_(&format!("r.{} = $value", quote(property)))
        .delete("r")
        .return_("count(*) AS count")
        .param("value", to_json(value))
        .build()
}

/// Remove the whole graph
pub fn clear_all() -> Statement {
    StatementBuilder::new().match_("(n)").detach_delete("n").build()
}

/// Count nodes
pub fn count_nodes() -> Statement {
    StatementBuilder::new()
        .match_("(n)")
        .return_("count(n) AS count")
        .build()
}

/// Count edges
pub fn count_edges() -> Statement {
    StatementBuilder::new()
        .match_("()-[r]->()")
        .return_("count(r) AS count")
        .build()
}

/// DDL for one schema item
pub fn schema_item(item: &SchemaItem) -> Statement {
    let query = match item {
        SchemaItem::UniqueKey(domain) => format!(
            "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
            quote(domain.label()),
            quote(domain.key_property())
        ),
        SchemaItem::Index { label, property } => format!(
            "CREATE INDEX IF NOT EXISTS FOR (n:{}) ON (n.{})",
            quote(label),
            quote(property)
        ),
    };
    StatementBuilder::new().raw(query).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_node_statement() {
        let mut properties = PropertyMap::new();
        properties.insert("Name".to_string(), PropertyValue::from("Wall-01"));
        let stmt = merge_node(&NodeUpsert {
            node: NodeRef::entity("w1"),
            labels: vec!["IfcWall".to_string()],
            properties,
            merge: PropertyMerge::Replace,
        });

        assert_eq!(
            stmt.query,
            "MERGE (n:`IfcEntity` {`GlobalId`: $key}) REMOVE n:`Unresolved` SET n = $props, n:`IfcWall`"
        );
        assert_eq!(stmt.params["key"], "w1");
        assert_eq!(stmt.params["props"]["Name"], "Wall-01");
        assert_eq!(stmt.params["props"]["GlobalId"], "w1");
    }

    #[test]
    fn test_merge_node_extend_keeps_stored_properties() {
        let stmt = merge_node(&NodeUpsert {
            node: NodeRef::material("Concrete"),
            labels: Vec::new(),
            properties: PropertyMap::new(),
            merge: PropertyMerge::Extend,
        });
        assert_eq!(
            stmt.query,
            "MERGE (n:`Material` {`name`: $key}) REMOVE n:`Unresolved` SET n += $props"
        );
        assert_eq!(stmt.params["props"]["name"], "Concrete");
    }

    #[test]
    fn test_merge_edge_statement() {
        let stmt = merge_edge(&EdgeUpsert {
            source: NodeRef::entity("w1"),
            target: NodeRef::material("Concrete"),
            rel_type: "HAS_MATERIAL".to_string(),
            properties: PropertyMap::new(),
        });
        assert!(stmt.query.starts_with("MATCH (a:`IfcEntity` {`GlobalId`: $source})"));
        assert!(stmt.query.contains("MATCH (b:`Material` {`name`: $target})"));
        assert!(stmt.query.contains("MERGE (a)-[r:`HAS_MATERIAL`]->(b)"));
        assert_eq!(stmt.params["target"], "Concrete");
    }

    #[test]
    fn test_quote_escapes_backticks() {
        assert_eq!(quote("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_schema_statements() {
        let stmt = schema_item(&SchemaItem::UniqueKey(NodeDomain::PropertySet));
        assert_eq!(
            stmt.query,
            "CREATE CONSTRAINT IF NOT EXISTS FOR (n:`PropertySet`) REQUIRE n.`id` IS UNIQUE"
        );
    }

    #[test]
    fn test_non_finite_float_encodes_as_string() {
        let mut properties = PropertyMap::new();
        properties.insert("x".to_string(), PropertyValue::Float(f64::NAN));
        assert_eq!(properties_param(&properties)["x"], "NaN");
    }
}
