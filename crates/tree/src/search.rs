//! Child searches
//!
//! Three ways to pick children out of a compound:
//!
//! - by *condition*: structural tests (empty cell, empty map, empty list)
//! - by *parameter*: a declarative comparison against stored values; the
//!   parameter's string value is parsed once per search, not per child
//! - by *deep equality* against another accessor's subtree
//!
//! Generic search widens matching: stored values can be stringified for
//! string-style operators, and numeric parameter strings can match
//! numeric cells.

use tagtree_core::{
    Name, NodeId, NodeKind, NodeValue, OpReport, OpResult, nearly_equal_f64,
};

use crate::accessor::{Accessor, equal_node_deep};
use crate::container::Container;

/// Comparison operator of a [`SearchParameter`]. Ordering operators apply
/// to numerics, the string operators to string-like values, `Eq`/`Ne` to
/// everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareOp {
    #[default]
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

/// Structural child filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCondition {
    IfEmpty,
    IfEmptyList,
    IfEmptyMap,
}

/// Declarative value comparison, built once and applied per child.
///
/// `key` restricts a map search to a single entry. `sub_key` redirects the
/// comparison into a child map: for each candidate, the value under
/// `sub_key` is what gets compared.
#[derive(Debug, Clone)]
pub struct SearchParameter {
    pub op: CompareOp,
    pub value_kind: NodeKind,
    pub value: String,
    pub ignore_case: bool,
    pub generic: bool,
    pub key: Option<Name>,
    pub sub_key: Option<Name>,
}

impl Default for SearchParameter {
    fn default() -> Self {
        SearchParameter {
            op: CompareOp::Eq,
            value_kind: NodeKind::String,
            value: String::new(),
            ignore_case: false,
            generic: false,
            key: None,
            sub_key: None,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    let lowered = s.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A parameter with its string value parsed into the comparison domains
/// it can participate in.
struct ParsedParameter<'a> {
    p: &'a SearchParameter,
    int: Option<i64>,
    float: Option<f64>,
    boolean: Option<bool>,
}

impl<'a> ParsedParameter<'a> {
    fn new(p: &'a SearchParameter) -> Self {
        let mut parsed = ParsedParameter {
            p,
            int: None,
            float: None,
            boolean: None,
        };
        match p.value_kind {
            NodeKind::Bool => parsed.boolean = parse_bool(&p.value),
            NodeKind::Int8 | NodeKind::Int16 | NodeKind::Int32 | NodeKind::Int64 => {
                parsed.int = p.value.trim().parse::<i64>().ok();
            }
            NodeKind::Float32 | NodeKind::Float64 => {
                parsed.float = p.value.trim().parse::<f64>().ok();
            }
            _ => {}
        }
        // Generic string search also primes every numeric/bool domain so
        // "123" can match an Int32 cell.
        if p.generic && p.value_kind == NodeKind::String {
            parsed.int = parsed.int.or_else(|| p.value.trim().parse::<i64>().ok());
            parsed.float = parsed.float.or_else(|| p.value.trim().parse::<f64>().ok());
            parsed.boolean = parsed.boolean.or_else(|| parse_bool(&p.value));
        }
        parsed
    }

    fn cmp_int(&self, a: i64) -> bool {
        let Some(b) = self.int else {
            return false;
        };
        match self.p.op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            _ => false,
        }
    }

    fn cmp_float(&self, a: f64) -> bool {
        let Some(b) = self.float else {
            return false;
        };
        match self.p.op {
            CompareOp::Eq => nearly_equal_f64(a, b),
            CompareOp::Ne => !nearly_equal_f64(a, b),
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            _ => false,
        }
    }

    fn cmp_bool(&self, a: bool) -> bool {
        let Some(b) = self.boolean else {
            return false;
        };
        match self.p.op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            _ => false,
        }
    }

    fn cmp_str(&self, a: &str) -> bool {
        let (a_cmp, b_cmp);
        let (a_ref, b_ref): (&str, &str) = if self.p.ignore_case {
            a_cmp = a.to_lowercase();
            b_cmp = self.p.value.to_lowercase();
            (&a_cmp, &b_cmp)
        } else {
            (a, &self.p.value)
        };
        match self.p.op {
            CompareOp::Eq => a_ref == b_ref,
            CompareOp::Ne => a_ref != b_ref,
            CompareOp::Contains => a_ref.contains(b_ref),
            CompareOp::StartsWith => a_ref.starts_with(b_ref),
            CompareOp::EndsWith => a_ref.ends_with(b_ref),
            _ => false,
        }
    }

    /// Stored value rendered for string-style generic comparison.
    fn value_to_string(cell: &NodeValue) -> Option<String> {
        match cell {
            NodeValue::String(s) => Some(s.clone()),
            NodeValue::Name(n) => Some(n.as_str().to_string()),
            NodeValue::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            NodeValue::Int8(v) => Some(v.to_string()),
            NodeValue::Int16(v) => Some(v.to_string()),
            NodeValue::Int32(v) => Some(v.to_string()),
            NodeValue::Int64(v) => Some(v.to_string()),
            NodeValue::Float32(v) => Some(v.to_string()),
            NodeValue::Float64(v) => Some(v.to_string()),
            _ => None,
        }
    }

    fn matches(&self, cell: &NodeValue) -> bool {
        match self.p.value_kind {
            NodeKind::Bool => {
                if let NodeValue::Bool(b) = cell {
                    return self.cmp_bool(*b);
                }
            }
            NodeKind::Int8 | NodeKind::Int16 | NodeKind::Int32 | NodeKind::Int64 => {
                if let Some(v) = cell.generic_int() {
                    return self.cmp_int(v);
                }
            }
            NodeKind::Float32 | NodeKind::Float64 => {
                if let Some(v) = cell.generic_float() {
                    return self.cmp_float(v);
                }
            }
            NodeKind::Name => {
                if let NodeValue::Name(n) = cell {
                    return self.cmp_str(n.as_str());
                }
                if self.p.generic {
                    if let NodeValue::String(s) = cell {
                        return self.cmp_str(s);
                    }
                }
            }
            NodeKind::String => {
                if let NodeValue::String(s) = cell {
                    return self.cmp_str(s);
                }
                if self.p.generic {
                    if let NodeValue::Name(n) = cell {
                        return self.cmp_str(n.as_str());
                    }
                }
            }
            _ => {}
        }

        if self.p.generic {
            match self.p.op {
                CompareOp::Contains
                | CompareOp::StartsWith
                | CompareOp::EndsWith
                | CompareOp::Eq
                | CompareOp::Ne => {
                    if let Some(s) = Self::value_to_string(cell) {
                        if !s.is_empty() {
                            return self.cmp_str(&s);
                        }
                    }
                }
                _ => {
                    if let Some(v) = cell.generic_int() {
                        if self.int.is_some() {
                            return self.cmp_int(v);
                        }
                    }
                    if let Some(v) = cell.generic_float() {
                        if self.float.is_some() {
                            return self.cmp_float(v);
                        }
                    }
                    if self.p.value_kind == NodeKind::String && self.boolean.is_some() {
                        if let NodeValue::Bool(b) = cell {
                            return self.cmp_bool(*b);
                        }
                    }
                }
            }
        }
        false
    }
}

fn condition_matches(cell: &NodeValue, condition: SearchCondition) -> bool {
    match condition {
        SearchCondition::IfEmpty => cell.is_empty_kind(),
        SearchCondition::IfEmptyMap => cell.map_data().map(|m| m.is_empty()).unwrap_or(false),
        SearchCondition::IfEmptyList => cell.list_data().map(|l| l.is_empty()).unwrap_or(false),
    }
}

/// Apply `sub_key` redirection, then run the predicate on the effective
/// cell.
fn child_matches(
    cont: &Container,
    child: NodeId,
    sub_key: Option<&Name>,
    pred: &dyn Fn(&NodeValue) -> bool,
) -> bool {
    let Some(cell) = cont.allocator.get(child) else {
        return false;
    };
    match sub_key {
        None => pred(cell),
        Some(sub) => cell
            .map_data()
            .and_then(|map| map.get(sub))
            .and_then(|sub_id| cont.allocator.get(sub_id))
            .map(pred)
            .unwrap_or(false),
    }
}

impl Accessor {
    /// Keys of map children matching `pred`, insertion order.
    fn map_keys_matching(
        &self,
        pred: impl Fn(&Container, NodeId) -> bool,
    ) -> Result<Vec<Name>, OpReport> {
        let Some(rc) = self.container.upgrade() else {
            return Err(OpReport::new(OpResult::InvalidContainer));
        };
        let cont = rc.borrow();
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return Err(report);
        }
        let Some(map) = cont.allocator.get(self.cached_id.get()).and_then(|c| c.map_data()) else {
            return Err(OpReport::new(OpResult::NodeTypeMismatch));
        };
        Ok(map
            .iter()
            .filter(|(_, id)| pred(&cont, *id))
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Indices of list children matching `pred`.
    fn list_indices_matching(
        &self,
        pred: impl Fn(&Container, NodeId) -> bool,
    ) -> Result<Vec<i32>, OpReport> {
        let Some(rc) = self.container.upgrade() else {
            return Err(OpReport::new(OpResult::InvalidContainer));
        };
        let cont = rc.borrow();
        let report = self.resolve_read(&cont);
        if !report.is_success() {
            return Err(report);
        }
        let Some(list) = cont.allocator.get(self.cached_id.get()).and_then(|c| c.list_data()) else {
            return Err(OpReport::new(OpResult::NodeTypeMismatch));
        };
        Ok(list
            .children
            .iter()
            .enumerate()
            .filter(|(_, id)| pred(&cont, **id))
            .map(|(i, _)| i as i32)
            .collect())
    }

    pub fn map_find_by_condition(&self, condition: SearchCondition) -> Option<Accessor> {
        self.map_keys_matching(|cont, id| {
            cont.allocator
                .get(id)
                .map(|cell| condition_matches(cell, condition))
                .unwrap_or(false)
        })
        .ok()?
        .into_iter()
        .next()
        .map(|key| self.child_by_key(key))
    }

    pub fn map_find_all_by_condition(
        &self,
        condition: SearchCondition,
    ) -> Result<Vec<Accessor>, OpReport> {
        let keys = self.map_keys_matching(|cont, id| {
            cont.allocator
                .get(id)
                .map(|cell| condition_matches(cell, condition))
                .unwrap_or(false)
        })?;
        Ok(keys.into_iter().map(|key| self.child_by_key(key)).collect())
    }

    pub fn list_find_by_condition(&self, condition: SearchCondition) -> Option<Accessor> {
        self.list_indices_matching(|cont, id| {
            cont.allocator
                .get(id)
                .map(|cell| condition_matches(cell, condition))
                .unwrap_or(false)
        })
        .ok()?
        .into_iter()
        .next()
        .map(|i| self.child_by_index(i))
    }

    pub fn list_find_all_by_condition(
        &self,
        condition: SearchCondition,
    ) -> Result<Vec<Accessor>, OpReport> {
        let indices = self.list_indices_matching(|cont, id| {
            cont.allocator
                .get(id)
                .map(|cell| condition_matches(cell, condition))
                .unwrap_or(false)
        })?;
        Ok(indices.into_iter().map(|i| self.child_by_index(i)).collect())
    }

    /// First map child matching the parameter. With `parameter.key` set,
    /// only that entry is considered.
    pub fn map_find_by_parameter(&self, parameter: &SearchParameter) -> Option<Accessor> {
        let parsed = ParsedParameter::new(parameter);
        let pred = move |cell: &NodeValue| parsed.matches(cell);
        let keys = self
            .map_keys_matching(|cont, id| {
                child_matches(cont, id, parameter.sub_key.as_ref(), &pred)
            })
            .ok()?;
        match &parameter.key {
            Some(key) => keys
                .into_iter()
                .find(|k| k == key)
                .map(|k| self.child_by_key(k)),
            None => keys.into_iter().next().map(|k| self.child_by_key(k)),
        }
    }

    /// First list element matching the parameter.
    pub fn list_find_by_parameter(&self, parameter: &SearchParameter) -> Option<Accessor> {
        let parsed = ParsedParameter::new(parameter);
        let pred = move |cell: &NodeValue| parsed.matches(cell);
        self.list_indices_matching(|cont, id| {
            child_matches(cont, id, parameter.sub_key.as_ref(), &pred)
        })
        .ok()?
        .into_iter()
        .next()
        .map(|i| self.child_by_index(i))
    }

    /// First map child deep-equal to `other`'s node.
    pub fn map_find_if_equal(&self, other: &Accessor) -> Option<Accessor> {
        let other_rc = other.container.upgrade()?;
        let other_cont = other_rc.borrow();
        if !other.resolve_read(&other_cont).is_success() {
            return None;
        }
        let other_id = other.cached_id.get();
        let keys = self
            .map_keys_matching(|cont, id| equal_node_deep(cont, id, &other_cont, other_id))
            .ok()?;
        drop(other_cont);
        keys.into_iter().next().map(|key| self.child_by_key(key))
    }

    /// All map children deep-equal to `other`'s node.
    pub fn map_find_all_if_equal(&self, other: &Accessor) -> Result<Vec<Accessor>, OpReport> {
        let Some(other_rc) = other.container.upgrade() else {
            return Err(OpReport::new(OpResult::InvalidContainer));
        };
        let other_cont = other_rc.borrow();
        if !other.resolve_read(&other_cont).is_success() {
            return Err(OpReport::new(OpResult::NotFoundNode));
        }
        let other_id = other.cached_id.get();
        let keys =
            self.map_keys_matching(|cont, id| equal_node_deep(cont, id, &other_cont, other_id))?;
        drop(other_cont);
        Ok(keys.into_iter().map(|key| self.child_by_key(key)).collect())
    }

    /// First list element deep-equal to `other`'s node.
    pub fn list_find_if_equal(&self, other: &Accessor) -> Option<Accessor> {
        let other_rc = other.container.upgrade()?;
        let other_cont = other_rc.borrow();
        if !other.resolve_read(&other_cont).is_success() {
            return None;
        }
        let other_id = other.cached_id.get();
        let indices = self
            .list_indices_matching(|cont, id| equal_node_deep(cont, id, &other_cont, other_id))
            .ok()?;
        drop(other_cont);
        indices.into_iter().next().map(|i| self.child_by_index(i))
    }

    /// All list elements deep-equal to `other`'s node.
    pub fn list_find_all_if_equal(&self, other: &Accessor) -> Result<Vec<Accessor>, OpReport> {
        let Some(other_rc) = other.container.upgrade() else {
            return Err(OpReport::new(OpResult::InvalidContainer));
        };
        let other_cont = other_rc.borrow();
        if !other.resolve_read(&other_cont).is_success() {
            return Err(OpReport::new(OpResult::NotFoundNode));
        }
        let other_id = other.cached_id.get();
        let indices =
            self.list_indices_matching(|cont, id| equal_node_deep(cont, id, &other_cont, other_id))?;
        drop(other_cont);
        Ok(indices.into_iter().map(|i| self.child_by_index(i)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Tree;

    fn sample_tree() -> Tree {
        let tree = Tree::new();
        let root = tree.accessor();
        root.child_by_key("hp").ensure_set_i32(100);
        root.child_by_key("name").ensure_set_string("Redgate".to_string());
        root.child_by_key("title").ensure_set_name(Name::new("Captain"));
        root.child_by_key("alive").ensure_set_bool(true);
        root.child_by_key("speed").ensure_set_f64(7.5);
        root.child_by_key("spare").ensure_set_empty();
        tree
    }

    fn param(op: CompareOp, kind: NodeKind, value: &str) -> SearchParameter {
        SearchParameter {
            op,
            value_kind: kind,
            value: value.to_string(),
            ..SearchParameter::default()
        }
    }

    #[test]
    fn numeric_parameter_search() {
        let tree = sample_tree();
        let root = tree.accessor();

        let found = root
            .map_find_by_parameter(&param(CompareOp::Eq, NodeKind::Int32, "100"))
            .expect("hp == 100");
        assert_eq!(found.get_i32(), Some(100));

        assert!(root
            .map_find_by_parameter(&param(CompareOp::Gt, NodeKind::Int32, "100"))
            .is_none());
        assert!(root
            .map_find_by_parameter(&param(CompareOp::Ge, NodeKind::Int64, "100"))
            .is_some());
    }

    #[test]
    fn string_parameter_search_with_case() {
        let tree = sample_tree();
        let root = tree.accessor();

        assert!(root
            .map_find_by_parameter(&param(CompareOp::StartsWith, NodeKind::String, "Red"))
            .is_some());
        assert!(root
            .map_find_by_parameter(&param(CompareOp::StartsWith, NodeKind::String, "red"))
            .is_none());

        let mut insensitive = param(CompareOp::StartsWith, NodeKind::String, "red");
        insensitive.ignore_case = true;
        assert!(root.map_find_by_parameter(&insensitive).is_some());
    }

    #[test]
    fn generic_search_crosses_kinds() {
        let tree = sample_tree();
        let root = tree.accessor();

        // Numeric string matches an int cell only with generic on.
        let strict = param(CompareOp::Eq, NodeKind::String, "100");
        assert!(root.map_find_by_parameter(&strict).is_none());
        let mut generic = strict.clone();
        generic.generic = true;
        assert_eq!(
            root.map_find_by_parameter(&generic).unwrap().get_i32(),
            Some(100)
        );

        // Name cells match string parameters with generic on.
        let mut name_as_string = param(CompareOp::Eq, NodeKind::String, "Captain");
        assert!(root.map_find_by_parameter(&name_as_string).is_none());
        name_as_string.generic = true;
        assert!(root.map_find_by_parameter(&name_as_string).is_some());
    }

    #[test]
    fn sub_key_redirection() {
        let tree = Tree::new();
        let root = tree.accessor();
        let items = root.child_by_key("items");
        assert!(items.ensure_map().is_ok());
        items
            .child_by_key("potion")
            .child_by_key("count")
            .ensure_set_i32(3);
        items
            .child_by_key("sword")
            .child_by_key("count")
            .ensure_set_i32(1);

        let mut p = param(CompareOp::Ge, NodeKind::Int32, "2");
        p.sub_key = Some(Name::new("count"));
        let found = items.map_find_by_parameter(&p).expect("potion count >= 2");
        assert!(found.map_has_key("count").is_success());
        assert_eq!(found.child_by_key("count").get_i32(), Some(3));
    }

    #[test]
    fn condition_search_finds_empties() {
        let tree = sample_tree();
        let root = tree.accessor();
        let found = root
            .map_find_by_condition(SearchCondition::IfEmpty)
            .expect("spare is empty");
        assert!(found.is_empty_value());

        root.child_by_key("bag").ensure_map();
        let empty_maps = root
            .map_find_all_by_condition(SearchCondition::IfEmptyMap)
            .unwrap();
        assert_eq!(empty_maps.len(), 1);
    }

    #[test]
    fn equality_search_across_trees() {
        let a = sample_tree();
        let b = sample_tree();
        let found = a
            .accessor()
            .map_find_if_equal(&b.accessor().child_by_key("hp"))
            .expect("hp matches across trees");
        assert_eq!(found.get_i32(), Some(100));
    }

    #[test]
    fn list_parameter_search() {
        let tree = Tree::new();
        let root = tree.accessor();
        let list = root.child_by_key("scores");
        assert!(list.ensure_list().is_ok());
        for score in [10i32, 55, 90] {
            let element = list.list_add().unwrap();
            assert!(element.override_to_i32(score).is_success());
        }

        let found = list
            .list_find_by_parameter(&param(CompareOp::Gt, NodeKind::Int32, "50"))
            .expect("first > 50");
        assert_eq!(found.list_current_index(), Some(1));
        assert_eq!(found.get_i32(), Some(55));
    }
}
