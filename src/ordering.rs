//! Ordering of entities along their relations

use crate::types::EntityMap;
use std::collections::{BTreeMap, BTreeSet};

/// Orders entity names so that related entities follow each other
///
/// With `owner_first` every owning entity comes before the entities it owns,
/// otherwise after them. Ties are broken by name. Entities caught in a cycle
/// of relations are appended by name once everything else is placed.
pub fn order_entities(entities: &EntityMap, owner_first: bool) -> Vec<String> {
    // Edges point from the entity that must come first
    let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut pending: BTreeMap<&str, usize> = entities.keys().map(|name| (name.as_str(), 0)).collect();

    for (owner, entity) in entities {
        for owned in entity.relations.keys() {
            if owned == owner || !entities.contains_key(owned) {
                continue;
            }
            let (first, second) = if owner_first {
                (owner.as_str(), owned.as_str())
            } else {
                (owned.as_str(), owner.as_str())
            };
            successors.entry(first).or_default().push(second);
            if let Some(count) = pending.get_mut(second) {
                *count += 1;
            }
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut ordered = Vec::with_capacity(entities.len());

    while let Some(name) = ready.pop_first() {
        pending.remove(name);
        ordered.push(name.to_string());
        for next in successors.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*next);
                }
            }
        }
    }

    ordered.extend(pending.keys().map(|name| name.to_string()));
    ordered
}
