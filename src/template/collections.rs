//! `<set>`, `<map>`, `<list>` and `<array>`.
//!
//! With an `operation` attribute these address the named knowledge-base
//! collection:
//!
//! | operation  | set / list / array                 | map                      |
//! |------------|------------------------------------|--------------------------|
//! | `add`      | append content (sets skip dupes)   | `key` = content          |
//! | `insert`   | insert at `index` (1-based)        | `key` = content          |
//! | `remove`   | at `index`, else equal members     | `key` (or content)       |
//! | `clear`    | empty the collection               | empty the map            |
//! | `size`     | member count                       | entry count              |
//! | `contains` | `true` / `false`                   | key present              |
//! | `get`      | member at `index`, else all        | value of `key`           |
//! | `set`      | replace at `index`, else append    | `key` = content          |
//! | `keys` / `values` / `list` | all members        | keys / values / `k=v`    |
//!
//! Without an operation the tag keeps its historical double meaning: empty
//! content means `get`, non-empty content assigns the session variable
//! `name` (or the local `var`) and emits the value. For `<map>` that means
//! `<map name="capital">France</map>` assigns the variable `capital`; a map
//! lookup needs `operation="get"`.
//!
//! All outputs of mutating operations are empty. Read-only operations take
//! the read lock, so they never bump revisions.

use super::evaluator::{Eval, Evaluator};
use super::parser::Element;
use super::tags::CollectionKind;
use crate::knowledge::KnowledgeBase;
use crate::normalize::normalize;
use crate::scope::{Tier, VariableContext};

const DEFAULT_DELIMITER: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Add,
    Insert,
    Remove,
    Clear,
    Size,
    Contains,
    Get,
    Set,
    Keys,
    Values,
    List,
}

impl Operation {
    fn parse(name: &str) -> Option<Self> {
        Some(match name.trim().to_ascii_lowercase().as_str() {
            "add" => Operation::Add,
            "insert" => Operation::Insert,
            "remove" => Operation::Remove,
            "clear" => Operation::Clear,
            "size" => Operation::Size,
            "contains" => Operation::Contains,
            "get" => Operation::Get,
            "set" => Operation::Set,
            "keys" => Operation::Keys,
            "values" => Operation::Values,
            "list" => Operation::List,
            _ => return None,
        })
    }

    fn mutates(self) -> bool {
        matches!(self, Operation::Add | Operation::Insert | Operation::Remove | Operation::Clear | Operation::Set)
    }
}

/// Evaluated arguments of one collection tag.
struct Request {
    name: String,
    value: String,
    key: Option<String>,
    index: Option<usize>,
    delimiter: String,
}

pub(super) fn evaluate(ev: &Evaluator<'_>, el: &Element, kind: CollectionKind, ctx: &mut VariableContext<'_>) -> Eval {
    let value = ev.content(el, ctx)?.trim().to_string();
    let Some(operation) = ev.attr_nonempty(el, "operation", ctx)? else {
        return default_operation(ev, el, kind, value, ctx);
    };
    let Some(op) = Operation::parse(&operation) else {
        tracing::warn!(operation = %operation, "unknown collection operation");
        return Ok(String::new());
    };
    let Some(name) = ev.attr_nonempty(el, "name", ctx)? else {
        tracing::warn!(operation = %operation, "collection operation without a name");
        return Ok(String::new());
    };
    let request = Request {
        name,
        value,
        key: ev.attr_nonempty(el, "key", ctx)?,
        index: ev.attr(el, "index", ctx)?.and_then(|i| i.parse().ok()).filter(|i: &usize| *i > 0),
        delimiter: ev.attr_untrimmed(el, "delimiter", ctx)?.filter(|d| !d.is_empty()).unwrap_or_else(|| DEFAULT_DELIMITER.to_string()),
    };

    if op.mutates() {
        let mut kb = ctx.knowledge.write();
        match kind {
            CollectionKind::Map => mutate_map(&mut kb, op, &request),
            _ => mutate_sequence(&mut kb, kind, op, &request),
        }
        Ok(String::new())
    } else {
        let kb = ctx.knowledge.read();
        Ok(match kind {
            CollectionKind::Map => read_map(&kb, op, &request),
            _ => read_sequence(&kb, kind, op, &request),
        })
    }
}

fn default_operation(
    ev: &Evaluator<'_>,
    el: &Element,
    kind: CollectionKind,
    value: String,
    ctx: &mut VariableContext<'_>,
) -> Eval {
    if let Some(var) = ev.attr_nonempty(el, "var", ctx)? {
        if value.is_empty() {
            return Ok(ctx.local(&var).unwrap_or("").to_string());
        }
        ctx.set(Tier::Local, &var, &value);
        return Ok(value);
    }
    let Some(name) = ev.attr_nonempty(el, "name", ctx)? else { return Ok(value) };

    if value.is_empty() {
        let request =
            Request { name, value, key: None, index: None, delimiter: DEFAULT_DELIMITER.to_string() };
        let kb = ctx.knowledge.read();
        return Ok(match kind {
            CollectionKind::Map => read_map(&kb, Operation::Get, &request),
            _ => read_sequence(&kb, kind, Operation::Get, &request),
        });
    }

    let tier = match ev.attr_nonempty(el, "scope", ctx)? {
        Some(scope) => Tier::from_scope(&scope).unwrap_or(Tier::Session),
        None => Tier::Session,
    };
    ctx.set(tier, &name, &value);
    Ok(value)
}

fn sequence<'k>(kb: &'k KnowledgeBase, kind: CollectionKind, name: &str) -> &'k [String] {
    let found = match kind {
        CollectionKind::Set => kb.set(name),
        CollectionKind::List => kb.list(name),
        CollectionKind::Array => kb.array(name),
        CollectionKind::Map => None,
    };
    found.unwrap_or(&[])
}

fn sequence_mut<'k>(kb: &'k mut KnowledgeBase, kind: CollectionKind, name: &str) -> &'k mut Vec<String> {
    match kind {
        CollectionKind::Set => kb.set_mut(name),
        CollectionKind::Array => kb.array_mut(name),
        CollectionKind::List | CollectionKind::Map => kb.list_mut(name),
    }
}

fn read_sequence(kb: &KnowledgeBase, kind: CollectionKind, op: Operation, req: &Request) -> String {
    let items = sequence(kb, kind, &req.name);
    match op {
        Operation::Size => items.len().to_string(),
        Operation::Contains => {
            let wanted = normalize(&req.value);
            items.iter().any(|m| normalize(m) == wanted).to_string()
        }
        Operation::Get => match req.index {
            Some(i) => items.get(i - 1).cloned().unwrap_or_default(),
            None => items.join(&req.delimiter),
        },
        _ => items.join(&req.delimiter),
    }
}

fn mutate_sequence(kb: &mut KnowledgeBase, kind: CollectionKind, op: Operation, req: &Request) {
    let unique = kind == CollectionKind::Set;
    let value = req.value.clone();
    let already = unique && kb.set_contains(&req.name, &value);
    let items = sequence_mut(kb, kind, &req.name);
    match op {
        Operation::Add => {
            if !value.is_empty() && !already {
                items.push(value);
            }
        }
        Operation::Insert => {
            if !value.is_empty() && !already {
                let at = req.index.map(|i| i - 1).unwrap_or(0).min(items.len());
                items.insert(at, value);
            }
        }
        Operation::Remove => match req.index {
            Some(i) if i <= items.len() => {
                items.remove(i - 1);
            }
            Some(_) => {}
            None => {
                let wanted = normalize(&value);
                items.retain(|m| normalize(m) != wanted);
            }
        },
        Operation::Clear => items.clear(),
        Operation::Set => match req.index {
            Some(i) => {
                if i > items.len() {
                    if kind != CollectionKind::Array {
                        items.push(value);
                        return;
                    }
                    items.resize(i, String::new());
                }
                items[i - 1] = value;
            }
            None => {
                if !value.is_empty() && !already {
                    items.push(value);
                }
            }
        },
        _ => {}
    }
}

fn read_map(kb: &KnowledgeBase, op: Operation, req: &Request) -> String {
    let Some(map) = kb.map(&req.name) else {
        return match op {
            Operation::Size => "0".to_string(),
            Operation::Contains => "false".to_string(),
            _ => String::new(),
        };
    };
    let key = req.key.clone().unwrap_or_else(|| req.value.clone());
    match op {
        Operation::Size => map.len().to_string(),
        Operation::Contains => kb.map_get(&req.name, &key).is_some().to_string(),
        Operation::Get if !key.is_empty() => kb.map_get(&req.name, &key).unwrap_or("").to_string(),
        Operation::Keys => map.keys().cloned().collect::<Vec<_>>().join(&req.delimiter),
        Operation::Values => map.values().cloned().collect::<Vec<_>>().join(&req.delimiter),
        _ => map.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(&req.delimiter),
    }
}

fn mutate_map(kb: &mut KnowledgeBase, op: Operation, req: &Request) {
    match op {
        Operation::Add | Operation::Insert | Operation::Set => match &req.key {
            Some(key) => {
                kb.map_insert(&req.name, key, req.value.clone());
            }
            None => tracing::warn!(map = %req.name, "map write without a key"),
        },
        Operation::Remove => {
            let key = req.key.clone().unwrap_or_else(|| req.value.clone());
            kb.map_remove(&req.name, &key);
        }
        Operation::Clear => kb.clear_map(&req.name),
        _ => {}
    }
}
