//! Collection and map deltas produced by dirty checking.

use crate::meta::PropertyMeta;
use crate::statement::AssignOp;
use crate::types::CqlValue;

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionAndMapChangeType {
  AssignValueToList,
  AssignValueToSet,
  AssignValueToMap,
  RemoveCollectionOrMap,
  AddToSet,
  RemoveFromSet,
  AppendToList,
  PrependToList,
  RemoveFromList,
  SetToListAtIndex,
  RemoveFromListAtIndex,
  AddToMap,
  RemoveFromMap,
}

impl CollectionAndMapChangeType {
  /// Index-addressed list changes embed the index in the statement text and
  /// cannot share a cached prepared statement.
  pub fn is_index_addressed(self) -> bool {
    matches!(
      self,
      CollectionAndMapChangeType::SetToListAtIndex | CollectionAndMapChangeType::RemoveFromListAtIndex
    )
  }
}

/// A single collection or map mutation with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange {
  AssignList(Vec<CqlValue>),
  AssignSet(Vec<CqlValue>),
  AssignMap(Vec<(CqlValue, CqlValue)>),
  RemoveCollectionOrMap,
  AddToSet(Vec<CqlValue>),
  RemoveFromSet(Vec<CqlValue>),
  AppendToList(Vec<CqlValue>),
  PrependToList(Vec<CqlValue>),
  RemoveFromList(Vec<CqlValue>),
  SetToListAtIndex { index: usize, element: CqlValue },
  RemoveFromListAtIndex { index: usize },
  AddToMap(Vec<(CqlValue, CqlValue)>),
  RemoveFromMap(Vec<CqlValue>),
}

impl CollectionChange {
  pub fn change_type(&self) -> CollectionAndMapChangeType {
    use CollectionAndMapChangeType as T;
    match self {
      CollectionChange::AssignList(_) => T::AssignValueToList,
      CollectionChange::AssignSet(_) => T::AssignValueToSet,
      CollectionChange::AssignMap(_) => T::AssignValueToMap,
      CollectionChange::RemoveCollectionOrMap => T::RemoveCollectionOrMap,
      CollectionChange::AddToSet(_) => T::AddToSet,
      CollectionChange::RemoveFromSet(_) => T::RemoveFromSet,
      CollectionChange::AppendToList(_) => T::AppendToList,
      CollectionChange::PrependToList(_) => T::PrependToList,
      CollectionChange::RemoveFromList(_) => T::RemoveFromList,
      CollectionChange::SetToListAtIndex { .. } => T::SetToListAtIndex,
      CollectionChange::RemoveFromListAtIndex { .. } => T::RemoveFromListAtIndex,
      CollectionChange::AddToMap(_) => T::AddToMap,
      CollectionChange::RemoveFromMap(_) => T::RemoveFromMap,
    }
  }

  /// How the change is expressed as a SET clause.
  pub fn assign_op(&self) -> AssignOp {
    match self {
      CollectionChange::AssignList(_)
      | CollectionChange::AssignSet(_)
      | CollectionChange::AssignMap(_)
      | CollectionChange::RemoveCollectionOrMap => AssignOp::Assign,
      CollectionChange::AddToSet(_) | CollectionChange::AppendToList(_) | CollectionChange::AddToMap(_) => {
        AssignOp::Add
      }
      CollectionChange::RemoveFromSet(_) | CollectionChange::RemoveFromList(_) | CollectionChange::RemoveFromMap(_) => {
        AssignOp::Subtract
      }
      CollectionChange::PrependToList(_) => AssignOp::Prepend,
      CollectionChange::SetToListAtIndex { index, .. } | CollectionChange::RemoveFromListAtIndex { index } => {
        AssignOp::AssignAtIndex(*index)
      }
    }
  }

  /// Value bound to the column marker of the SET clause.
  pub fn bound_value(&self) -> CqlValue {
    match self {
      CollectionChange::AssignList(items)
      | CollectionChange::AppendToList(items)
      | CollectionChange::PrependToList(items)
      | CollectionChange::RemoveFromList(items) => CqlValue::List(items.clone()),
      CollectionChange::AssignSet(items)
      | CollectionChange::AddToSet(items)
      | CollectionChange::RemoveFromSet(items)
      | CollectionChange::RemoveFromMap(items) => CqlValue::Set(items.clone()),
      CollectionChange::AssignMap(entries) | CollectionChange::AddToMap(entries) => CqlValue::Map(entries.clone()),
      CollectionChange::RemoveCollectionOrMap | CollectionChange::RemoveFromListAtIndex { .. } => CqlValue::Null,
      CollectionChange::SetToListAtIndex { element, .. } => element.clone(),
    }
  }
}

/// Change recorded against one collection or map property.
#[derive(Debug, Clone)]
pub struct DirtyCheckChangeSet {
  property: Arc<PropertyMeta>,
  change: CollectionChange,
}

impl DirtyCheckChangeSet {
  pub fn new(property: Arc<PropertyMeta>, change: CollectionChange) -> Self {
    Self { property, change }
  }

  pub fn property(&self) -> &Arc<PropertyMeta> {
    &self.property
  }

  pub fn change(&self) -> &CollectionChange {
    &self.change
  }

  pub fn change_type(&self) -> CollectionAndMapChangeType {
    self.change.change_type()
  }
}
