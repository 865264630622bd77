//! Compound document serialization.
//!
//! Primary models are rendered first and registered in a request-scoped
//! index keyed by `(type, id)`. The include tree is then walked level by
//! level: for every include position the adapter's batched loader is called
//! once per relationship, and each related model is rendered at most once.
//! Work is keyed by `(type, id, include path)`, so cyclic graphs terminate
//! and a resource reached at several positions still gets its own subtree
//! expanded at each of them.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::debug;

use crate::adapter::{Model, Related};
use crate::context::Context;
use crate::document::ResourceObject;
use crate::error::JsonApiError;
use crate::field::FieldKind;
use crate::interpreter::{Fieldsets, IncludeTree};
use crate::registry::ResourceType;

/// Rendered primary resources and their deduplicated included set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compound {
    pub primary: Vec<ResourceObject>,
    pub included: Vec<ResourceObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Primary(usize),
    Included(usize),
}

/// A rendered resource whose relationships still need expanding.
struct Pending<'t> {
    resource_type: String,
    slot: Slot,
    tree: &'t IncludeTree,
    path: String,
}

/// Render `models` of `resource` with everything `include` asks for.
pub fn compound(
    ctx: &Context<'_>,
    resource: &ResourceType,
    models: Vec<Model>,
    include: &IncludeTree,
    fields: &Fieldsets,
) -> Result<Compound, JsonApiError> {
    let mut graph = Graph {
        ctx,
        fields,
        index: HashMap::new(),
        visited: HashSet::new(),
        primary: Vec::with_capacity(models.len()),
        included: Vec::new(),
    };

    let mut frontier = Vec::with_capacity(models.len());
    for model in models {
        let object = resource_object(resource, &model, fields, ctx)?;
        let key = (object.resource_type.clone(), object.id.clone());
        let slot = Slot::Primary(graph.primary.len());
        graph.index.entry(key.clone()).or_insert(slot);
        graph.primary.push((object, model));
        if graph.visited.insert((key.0.clone(), key.1, String::new())) {
            frontier.push(Pending {
                resource_type: key.0,
                slot,
                tree: include,
                path: String::new(),
            });
        }
    }

    while !frontier.is_empty() {
        frontier = graph.expand(frontier)?;
    }

    debug!(
        resource = %resource.name(),
        primary = graph.primary.len(),
        included = graph.included.len(),
        "serialized compound document"
    );
    Ok(Compound {
        primary: graph.primary.into_iter().map(|(object, _)| object).collect(),
        included: graph.included.into_iter().map(|(object, _)| object).collect(),
    })
}

/// Render one model: id, visible attributes, meta and links.
///
/// Relationships are filled in by [`compound`].
pub fn resource_object(
    resource: &ResourceType,
    model: &Model,
    fields: &Fieldsets,
    ctx: &Context<'_>,
) -> Result<ResourceObject, JsonApiError> {
    let adapter = resource.adapter();
    let id = resource.id_of(model, ctx)?;
    let mut object = ResourceObject::new(resource.name(), id);
    object.links.insert(
        "self".to_string(),
        Value::String(ctx.config.url(&format!(
            "/{}/{}",
            resource.name(),
            urlencoding::encode(&object.id)
        ))),
    );

    for field in resource.fields() {
        let target = match field.kind() {
            FieldKind::Attribute if fields.allows(resource.name(), field.name()) => {
                &mut object.attributes
            }
            FieldKind::Meta => &mut object.meta,
            FieldKind::Link => &mut object.links,
            _ => continue,
        };
        if !field.is_visible(model, ctx) {
            continue;
        }
        let value = field.get_value(model, ctx, adapter)?;
        target.insert(field.name().to_string(), field.serialize(value));
    }
    Ok(object)
}

struct Graph<'c, 'a, 'f> {
    ctx: &'c Context<'a>,
    fields: &'f Fieldsets,
    index: HashMap<(String, String), Slot>,
    visited: HashSet<(String, String, String)>,
    primary: Vec<(ResourceObject, Model)>,
    included: Vec<(ResourceObject, Model)>,
}

impl<'c, 'a, 'f> Graph<'c, 'a, 'f> {
    fn entry(&self, slot: Slot) -> &(ResourceObject, Model) {
        match slot {
            Slot::Primary(i) => &self.primary[i],
            Slot::Included(i) => &self.included[i],
        }
    }

    fn object_mut(&mut self, slot: Slot) -> &mut ResourceObject {
        match slot {
            Slot::Primary(i) => &mut self.primary[i].0,
            Slot::Included(i) => &mut self.included[i].0,
        }
    }

    /// Expand one level: load, link and include every relationship of the
    /// pending resources, returning the next level.
    fn expand<'t>(&mut self, frontier: Vec<Pending<'t>>) -> Result<Vec<Pending<'t>>, JsonApiError> {
        let ctx = self.ctx;
        let registry = ctx.registry;

        // Resources at the same include position share a tree and a type.
        let mut groups: Vec<(&str, &str, &'t IncludeTree, Vec<Slot>)> = Vec::new();
        for pending in &frontier {
            match groups
                .iter_mut()
                .find(|(path, ty, _, _)| *path == pending.path && *ty == pending.resource_type)
            {
                Some(group) => group.3.push(pending.slot),
                None => groups.push((
                    &pending.path,
                    &pending.resource_type,
                    pending.tree,
                    vec![pending.slot],
                )),
            }
        }

        let mut next = Vec::new();
        for (path, resource_type, tree, slots) in groups {
            let resource = registry.resource(resource_type)?;
            for field in resource.fields() {
                let Some(rel) = field.relationship() else {
                    continue;
                };
                let child = tree.child(field.name());
                let render = self.fields.allows(resource_type, field.name())
                    && (rel.linkage || child.is_some());
                if !render && child.is_none() {
                    continue;
                }

                let slots: Vec<Slot> = slots
                    .iter()
                    .copied()
                    .filter(|slot| field.is_visible(&self.entry(*slot).1, ctx))
                    .collect();
                if slots.is_empty() {
                    continue;
                }

                let models: Vec<&Model> = slots.iter().map(|slot| &self.entry(*slot).1).collect();
                let related = resource
                    .adapter()
                    .load_related(&models, field, child.is_none(), ctx)?;
                if related.len() != slots.len() {
                    return Err(JsonApiError::internal(format!(
                        "load_related for {}.{} returned {} results for {} models",
                        resource_type,
                        field.name(),
                        related.len(),
                        slots.len()
                    )));
                }

                let target = registry.resource(&rel.resource_type)?;
                let child_path = if path.is_empty() {
                    field.name().to_string()
                } else {
                    format!("{}.{}", path, field.name())
                };

                for (slot, related) in slots.into_iter().zip(related) {
                    let (to_many, models) = match related {
                        Related::One(model) => (false, model.into_iter().collect::<Vec<_>>()),
                        Related::Many(models) => (true, models),
                    };

                    let mut linkage = Vec::with_capacity(models.len());
                    for model in models {
                        let id = identify(target, &model, ctx)?;
                        linkage.push(json!({ "type": target.name(), "id": id }));

                        let Some(child) = child else {
                            continue;
                        };
                        let key = (target.name().to_string(), id);
                        if !self
                            .visited
                            .insert((key.0.clone(), key.1.clone(), child_path.clone()))
                        {
                            continue;
                        }
                        let related_slot = match self.index.get(&key) {
                            Some(existing) => *existing,
                            None => {
                                let Some(model) = resolve_stub(target, model, &key.1, ctx)? else {
                                    continue;
                                };
                                let object = resource_object(target, &model, self.fields, ctx)?;
                                let slot = Slot::Included(self.included.len());
                                self.included.push((object, model));
                                self.index.insert(key.clone(), slot);
                                slot
                            }
                        };
                        next.push(Pending {
                            resource_type: key.0,
                            slot: related_slot,
                            tree: child,
                            path: child_path.clone(),
                        });
                    }

                    if render {
                        let data = if to_many {
                            Value::Array(linkage)
                        } else {
                            linkage.into_iter().next().unwrap_or(Value::Null)
                        };
                        self.object_mut(slot)
                            .relationships
                            .insert(field.name().to_string(), json!({ "data": data }));
                    }
                }
            }
        }
        Ok(next)
    }
}

/// `{"id": ...}` placeholders returned by linkage-only loaders.
fn is_stub(model: &Model) -> bool {
    model.as_object().is_some_and(|m| m.len() == 1 && m.contains_key("id"))
}

fn identify(target: &ResourceType, model: &Model, ctx: &Context<'_>) -> Result<String, JsonApiError> {
    if is_stub(model) {
        match &model["id"] {
            Value::String(id) => return Ok(id.clone()),
            Value::Number(id) => return Ok(id.to_string()),
            _ => {}
        }
    }
    target.id_of(model, ctx)
}

/// Replace a placeholder with the full model through the target's finder.
fn resolve_stub(
    target: &ResourceType,
    model: Model,
    id: &str,
    ctx: &Context<'_>,
) -> Result<Option<Model>, JsonApiError> {
    if !is_stub(&model) {
        return Ok(Some(model));
    }
    match target.adapter().findable() {
        Some(findable) => findable.find(id, ctx),
        None => Ok(Some(model)),
    }
}
