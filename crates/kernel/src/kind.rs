//! Type identity for thinkers: names, single-parent hierarchy, state codecs.

use crate::thinker::{AsAny, Thinker};
use crate::KernelError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::BTreeMap;
use tickwork_common::StatNum;

/// A concrete thinker type known to the registry.
///
/// `PARENT` names the kind this one behaves as in polymorphic queries. The
/// parent only has to be registered for the hierarchy walk to continue past it.
pub trait Kind: Thinker + Serialize + DeserializeOwned {
    const NAME: &'static str;
    const PARENT: Option<&'static str> = None;
    /// Class used by [`crate::World::create`].
    const DEFAULT_STAT: StatNum = StatNum::DEFAULT;
}

type SaveFn = fn(&dyn Thinker) -> Result<serde_json::Value, KernelError>;
type LoadFn = fn(serde_json::Value) -> Result<Box<dyn Thinker>, KernelError>;

#[derive(Clone)]
struct KindInfo {
    parent: Option<&'static str>,
    type_id: Option<TypeId>,
    save: Option<SaveFn>,
    load: Option<LoadFn>,
}

/// Registry of thinker kinds, shared by every world through the heap.
#[derive(Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<&'static str, KindInfo>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete kind. Re-registering is a no-op. A second type
    /// reusing a registered name is rejected and the first one stays.
    pub fn register<T: Kind>(&mut self) -> &mut Self {
        if self.kinds.contains_key(T::NAME) {
            if !self.type_matches::<T>() {
                tracing::warn!(
                    kind = T::NAME,
                    ty = std::any::type_name::<T>(),
                    "kind name already taken by another type"
                );
            }
            return self;
        }
        self.kinds.insert(T::NAME, KindInfo {
            parent: T::PARENT,
            type_id: Some(TypeId::of::<T>()),
            save: Some(save_kind::<T>),
            load: Some(load_kind::<T>),
        });
        self
    }

    /// Register an abstract kind: a name that only exists to be a parent.
    pub fn register_abstract(
        &mut self,
        name: &'static str,
        parent: Option<&'static str>,
    ) -> &mut Self {
        self.kinds.entry(name).or_insert(KindInfo {
            parent,
            type_id: None,
            save: None,
            load: None,
        });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn parent_of(&self, name: &str) -> Option<&'static str> {
        self.kinds.get(name).and_then(|k| k.parent)
    }

    /// Whether `kind` is `target` (exact) or `target` or a descendant of it.
    pub fn is_a(&self, kind: &str, target: &str, exact: bool) -> bool {
        if kind == target {
            return true;
        }
        if exact {
            return false;
        }
        let mut current = self.parent_of(kind);
        // Bounded by the number of kinds so a mis-declared cycle cannot spin.
        for _ in 0..self.kinds.len() {
            match current {
                Some(name) if name == target => return true,
                Some(name) => current = self.parent_of(name),
                None => return false,
            }
        }
        false
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.keys().copied()
    }

    pub(crate) fn save(&self, kind: &str, thinker: &dyn Thinker) -> Result<serde_json::Value, KernelError> {
        let save = self
            .kinds
            .get(kind)
            .and_then(|k| k.save)
            .ok_or_else(|| KernelError::UnknownKind(kind.to_string()))?;
        save(thinker)
    }

    /// Decode a saved thinker. Returns the registry's static name for `kind`.
    pub(crate) fn load(
        &self,
        kind: &str,
        state: serde_json::Value,
    ) -> Result<(&'static str, Box<dyn Thinker>), KernelError> {
        let (name, info) = self
            .kinds
            .get_key_value(kind)
            .ok_or_else(|| KernelError::UnknownKind(kind.to_string()))?;
        let load = info
            .load
            .ok_or_else(|| KernelError::UnknownKind(kind.to_string()))?;
        Ok((*name, load(state)?))
    }

    /// Whether `T` is the type registered under its name.
    pub(crate) fn type_matches<T: Kind>(&self) -> bool {
        self.kinds
            .get(T::NAME)
            .and_then(|k| k.type_id)
            .is_some_and(|id| id == TypeId::of::<T>())
    }
}

fn save_kind<T: Kind>(thinker: &dyn Thinker) -> Result<serde_json::Value, KernelError> {
    let concrete = <dyn Thinker as AsAny>::as_any(thinker)
        .downcast_ref::<T>()
        .ok_or(KernelError::KindMismatch { expected: T::NAME })?;
    Ok(serde_json::to_value(concrete)?)
}

fn load_kind<T: Kind>(state: serde_json::Value) -> Result<Box<dyn Thinker>, KernelError> {
    let thinker: T = serde_json::from_value(state)?;
    Ok(Box::new(thinker))
}
