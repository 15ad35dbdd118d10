//! Definition storage and indexing.

use crate::definition::{Definition, DefinitionKind, FieldDefinition, FieldType};
use crate::error::DefinitionError;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Definitions of one namespace, indexed by identifier and by numeric id.
///
/// Redefining an identifier unions the field lists: existing fields keep
/// their position and take the new version, new fields are appended. A field
/// whose type changes is rejected and leaves the store untouched.
#[derive(Debug, Clone, Default)]
pub struct DefinitionStore {
    definitions: Vec<Definition>,
    by_identifier: HashMap<String, usize>,
    by_id: HashMap<u32, usize>,
}

impl DefinitionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.iter()
    }

    /// Look a definition up by its identifier.
    pub fn get_by_name(&self, identifier: &str) -> Option<&Definition> {
        self.by_identifier
            .get(identifier)
            .and_then(|&i| self.definitions.get(i))
    }

    pub fn get_by_id(&self, id: u32) -> Option<&Definition> {
        self.by_id.get(&id).and_then(|&i| self.definitions.get(i))
    }

    /// Like [`get_by_name`](Self::get_by_name), but an absent definition is an error.
    pub fn require(&self, identifier: &str) -> Result<&Definition, DefinitionError> {
        self.get_by_name(identifier)
            .ok_or_else(|| DefinitionError::UnknownDefinition(identifier.to_owned()))
    }

    /// Insert a definition, or merge it into the existing one of the same identifier.
    ///
    /// Returns the stored definition as it reads after the merge.
    pub fn add(&mut self, definition: Definition) -> Result<&Definition, DefinitionError> {
        validate(&definition)?;

        let existing = self.by_identifier.get(&definition.identifier).copied();
        if let Some(id) = definition.id {
            match self.by_id.get(&id) {
                Some(&owner) if Some(owner) != existing => {
                    return Err(DefinitionError::DuplicateId {
                        id,
                        identifier: definition.identifier,
                        owner: self.definitions[owner].identifier.clone(),
                    });
                }
                _ => {}
            }
        }

        let index = match existing {
            Some(index) => {
                let merged = merge(&self.definitions[index], definition)?;
                tracing::debug!(identifier = %merged.identifier, "definition redefined");
                self.definitions[index] = merged;
                index
            }
            None => {
                self.definitions.push(definition);
                self.definitions.len() - 1
            }
        };
        self.reindex();
        Ok(&self.definitions[index])
    }

    /// Add many definitions, collecting the ones that were rejected.
    pub fn load_all(
        &mut self,
        definitions: impl IntoIterator<Item = Definition>,
    ) -> Vec<DefinitionError> {
        definitions
            .into_iter()
            .filter_map(|def| self.add(def).err())
            .collect()
    }

    /// Remove a definition by identifier.
    pub fn remove(&mut self, identifier: &str) -> Option<Definition> {
        let index = self.by_identifier.get(identifier).copied()?;
        let removed = self.definitions.remove(index);
        self.reindex();
        Some(removed)
    }

    /// Build an instance of `identifier` populated with each field's default.
    pub fn compute_default_instance(
        &self,
        identifier: &str,
    ) -> Result<Map<String, Value>, DefinitionError> {
        let definition = self.require(identifier)?;
        definition
            .fields
            .iter()
            .map(|field| Ok((field.name.clone(), default_value(field)?)))
            .collect()
    }

    fn reindex(&mut self) {
        self.by_identifier = self
            .definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.identifier.clone(), i))
            .collect();
        self.by_id = self
            .definitions
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.id.map(|id| (id, i)))
            .collect();
    }
}

fn validate(definition: &Definition) -> Result<(), DefinitionError> {
    if definition.identifier.trim().is_empty() {
        return Err(DefinitionError::malformed(
            &definition.identifier,
            "empty identifier",
        ));
    }
    let mut seen = HashSet::new();
    for field in &definition.fields {
        if field.name.is_empty() {
            return Err(DefinitionError::malformed(
                &definition.identifier,
                "field with empty name",
            ));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(DefinitionError::malformed(
                &definition.identifier,
                format!("duplicate field `{}`", field.name),
            ));
        }
        if field.elements == 0 {
            return Err(DefinitionError::malformed(
                &definition.identifier,
                format!("field `{}` has no elements", field.name),
            ));
        }
        if !field.elements_name.is_empty()
            && u32::try_from(field.elements_name.len()).ok() != Some(field.elements)
        {
            return Err(DefinitionError::malformed(
                &definition.identifier,
                format!(
                    "field `{}` names {} elements but declares {}",
                    field.name,
                    field.elements_name.len(),
                    field.elements
                ),
            ));
        }
    }
    Ok(())
}

fn merge(previous: &Definition, incoming: Definition) -> Result<Definition, DefinitionError> {
    let mut fields: Vec<FieldDefinition> = Vec::with_capacity(previous.fields.len());
    for old in &previous.fields {
        match incoming.field(&old.name) {
            Some(new) if new.field_type != old.field_type => {
                return Err(DefinitionError::ConflictingField {
                    identifier: incoming.identifier.clone(),
                    field: old.name.clone(),
                    previous: old.field_type.clone(),
                    current: new.field_type.clone(),
                });
            }
            Some(new) => fields.push(new.clone()),
            None => fields.push(old.clone()),
        }
    }
    for new in &incoming.fields {
        if previous.field(&new.name).is_none() {
            fields.push(new.clone());
        }
    }

    Ok(Definition {
        identifier: incoming.identifier,
        id: incoming.id.or(previous.id),
        kind: incoming.kind.or(previous.kind),
        fields,
    })
}

fn default_value(field: &FieldDefinition) -> Result<Value, DefinitionError> {
    let Some(field_type) = FieldType::from_tag(&field.field_type) else {
        return Err(DefinitionError::UnknownFieldType {
            field: field.name.clone(),
            type_tag: field.field_type.clone(),
        });
    };
    let parse = |raw: &str| {
        field_type
            .parse(raw)
            .ok_or_else(|| DefinitionError::InvalidDefaultValue {
                field: field.name.clone(),
                value: raw.to_owned(),
            })
    };

    if field.elements <= 1 {
        return parse(&field.default_value);
    }

    // Walk the declared elements against the supplied parts; a short default
    // fails on its first missing element.
    let mut parts = field.default_value.split(',');
    let mut nested = Map::new();
    for index in 0..field.elements {
        let Some(raw) = parts.next() else {
            return Err(DefinitionError::InvalidDefaultValue {
                field: field.name.clone(),
                value: field.default_value.clone(),
            });
        };
        let name = match field.elements_name.get(index as usize) {
            Some(name) => name.clone(),
            None => index.to_string(),
        };
        nested.insert(name, parse(raw)?);
    }
    Ok(Value::Object(nested))
}

/// Namespace a definition lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Telemetry objects, and any definition without a kind.
    Objects,
    Actions,
    Events,
}

impl Namespace {
    pub const ALL: [Self; 3] = [Self::Objects, Self::Actions, Self::Events];

    pub fn of(definition: &Definition) -> Self {
        Self::for_kind(definition.kind)
    }

    pub fn for_kind(kind: Option<DefinitionKind>) -> Self {
        match kind {
            None => Self::Objects,
            Some(DefinitionKind::Action) => Self::Actions,
            Some(DefinitionKind::Event) => Self::Events,
        }
    }
}

/// One [`DefinitionStore`] per [`Namespace`].
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    objects: DefinitionStore,
    actions: DefinitionStore,
    events: DefinitionStore,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, namespace: Namespace) -> &DefinitionStore {
        match namespace {
            Namespace::Objects => &self.objects,
            Namespace::Actions => &self.actions,
            Namespace::Events => &self.events,
        }
    }

    pub fn store_mut(&mut self, namespace: Namespace) -> &mut DefinitionStore {
        match namespace {
            Namespace::Objects => &mut self.objects,
            Namespace::Actions => &mut self.actions,
            Namespace::Events => &mut self.events,
        }
    }

    /// Add a definition to the namespace its kind selects.
    pub fn add(&mut self, definition: Definition) -> Result<&Definition, DefinitionError> {
        self.store_mut(Namespace::of(&definition)).add(definition)
    }

    /// Search every namespace for `identifier`.
    pub fn find(&self, identifier: &str) -> Option<&Definition> {
        self.stores().find_map(|s| s.get_by_name(identifier))
    }

    /// First namespace holding `identifier`.
    pub fn locate(&self, identifier: &str) -> Option<Namespace> {
        Namespace::ALL
            .into_iter()
            .find(|&ns| self.store(ns).get_by_name(identifier).is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.stores().all(DefinitionStore::is_empty)
    }

    /// All definitions, objects first, then actions, then events.
    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.stores().flat_map(DefinitionStore::iter)
    }

    fn stores(&self) -> impl Iterator<Item = &DefinitionStore> {
        [&self.objects, &self.actions, &self.events].into_iter()
    }
}
