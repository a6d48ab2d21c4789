use std::collections::HashSet;

use crate::error::Error;
use crate::ModuleId;

/// Returns `ids` reordered so that every id appears after all ids its `deps_of` names, breaking
/// ties by the original order of `ids` (a stable topological sort, not just any valid one).
///
/// `deps_of(id)` must return `&[]` for unknown ids; this function itself does not validate that
/// referenced ids exist in `ids` -- callers that need that check should run
/// `is_topologically_sorted` afterwards, which does.
pub fn topological_sort<'a>(
    ids: &'a [ModuleId],
    deps_of: impl Fn(&ModuleId) -> &'a [ModuleId],
) -> Result<Vec<ModuleId>, Error> {
    let index_of: std::collections::HashMap<&ModuleId, usize> =
        ids.iter().enumerate().map(|(i, id)| (id, i)).collect();

    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut out = Vec::with_capacity(ids.len());

    for id in ids {
        visit(
            id,
            &index_of,
            &deps_of,
            &mut visited,
            &mut on_stack,
            &mut out,
        )?;
    }
    Ok(out)
}

fn visit<'a>(
    id: &ModuleId,
    index_of: &std::collections::HashMap<&ModuleId, usize>,
    deps_of: &impl Fn(&ModuleId) -> &'a [ModuleId],
    visited: &mut HashSet<ModuleId>,
    on_stack: &mut HashSet<ModuleId>,
    out: &mut Vec<ModuleId>,
) -> Result<(), Error> {
    if visited.contains(id) {
        return Ok(());
    }
    if !index_of.contains_key(id) {
        return Err(Error::MalformedManifest(format!(
            "dependency {id} is not a known module id"
        )));
    }
    if on_stack.contains(id) {
        return Err(Error::MalformedManifest(format!(
            "dependency cycle detected at {id}"
        )));
    }
    on_stack.insert(id.clone());

    // deps_of already returns ids in the declaring module's own insertion order; visiting them in
    // that order, then falling back to `ids`' own order via `index_of`, is what makes ties stable.
    for dep in deps_of(id) {
        visit(dep, index_of, deps_of, visited, on_stack, out)?;
    }

    on_stack.remove(id);
    visited.insert(id.clone());
    out.push(id.clone());
    Ok(())
}

/// True iff every id in `ids` appears after all ids named by its own `deps_of`.
pub fn is_topologically_sorted<'a>(
    ids: &'a [ModuleId],
    deps_of: impl Fn(&ModuleId) -> &'a [ModuleId],
) -> bool {
    let position: std::collections::HashMap<&ModuleId, usize> =
        ids.iter().enumerate().map(|(i, id)| (id, i)).collect();
    for (i, id) in ids.iter().enumerate() {
        for dep in deps_of(id) {
            match position.get(dep) {
                Some(&j) if j < i => {}
                _ => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ModuleId {
        ModuleId::new(s)
    }

    #[test]
    fn sorts_and_is_stable() {
        // C -> [B], B -> [A], A -> []  inserted in order [C, B, A]
        let ids = vec![id("C"), id("B"), id("A")];
        let deps = |m: &ModuleId| -> &[ModuleId] {
            if m.as_str() == "C" {
                Box::leak(vec![id("B")].into_boxed_slice())
            } else if m.as_str() == "B" {
                Box::leak(vec![id("A")].into_boxed_slice())
            } else {
                &[]
            }
        };
        let sorted = topological_sort(&ids, deps).unwrap();
        assert_eq!(sorted, vec![id("A"), id("B"), id("C")]);
        assert!(is_topologically_sorted(&sorted, deps));
    }

    #[test]
    fn detects_cycle() {
        let ids = vec![id("A"), id("B")];
        let deps = |m: &ModuleId| -> &[ModuleId] {
            if m.as_str() == "A" {
                Box::leak(vec![id("B")].into_boxed_slice())
            } else {
                Box::leak(vec![id("A")].into_boxed_slice())
            }
        };
        assert!(topological_sort(&ids, deps).is_err());
    }

    #[test]
    fn detects_missing_dependency() {
        let ids = vec![id("A")];
        let deps =
            |_: &ModuleId| -> &[ModuleId] { Box::leak(vec![id("ghost")].into_boxed_slice()) };
        assert!(topological_sort(&ids, deps).is_err());
    }
}
