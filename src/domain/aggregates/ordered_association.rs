//! Ordered Association Aggregate
//!
//! A list of children scoped to one parent, each holding a 1-based position.
//! Every mutation leaves the positions dense: exactly `1..=len` with no gaps
//! and no duplicates. Callers serialize access per scope; this type does no
//! locking of its own.

use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashSet;
use std::hash::Hash;

use crate::domain::value_objects::ClassificationId;

/// Current time at microsecond precision, the resolution `timestamptz` keeps.
pub fn stamp() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

/// One positioned entry of an association.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member<C> {
    pub id: ClassificationId,
    pub child: C,
    pub position: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<C> Member<C> {
    pub fn new(id: ClassificationId, child: C, position: u32) -> Self {
        let now = stamp();
        Self { id, child, position, created_at: now, updated_at: now }
    }

    fn place(&mut self, position: u32) {
        if self.position != position {
            self.position = position;
            self.updated_at = stamp();
        }
    }
}

/// Ordered list of `C` scoped to parent `P`, kept sorted by position.
#[derive(Clone, Debug)]
pub struct OrderedAssociation<P, C> {
    scope: P,
    members: Vec<Member<C>>,
}

/// Outcome of a wholesale [`OrderedAssociation::reorder`].
#[derive(Clone, Debug)]
pub struct Reordered<C> {
    pub removed: Vec<Member<C>>,
    pub added: Vec<Member<C>>,
}

impl<P, C> OrderedAssociation<P, C>
where
    P: Clone,
    C: Clone + Eq + Hash,
{
    pub fn new(scope: P) -> Self { Self { scope, members: vec![] } }

    /// Rebuilds an association from stored members. Positions are taken as-is;
    /// call [`check_density`](Self::check_density) to validate them.
    pub fn from_members(scope: P, mut members: Vec<Member<C>>) -> Self {
        members.sort_by_key(|m| m.position);
        Self { scope, members }
    }

    pub fn scope(&self) -> &P { &self.scope }
    pub fn members(&self) -> &[Member<C>] { &self.members }
    pub fn len(&self) -> usize { self.members.len() }
    pub fn is_empty(&self) -> bool { self.members.is_empty() }
    pub fn positions(&self) -> Vec<u32> { self.members.iter().map(|m| m.position).collect() }
    pub fn children(&self) -> impl Iterator<Item = &C> + '_ { self.members.iter().map(|m| &m.child) }
    pub fn contains(&self, child: &C) -> bool { self.members.iter().any(|m| &m.child == child) }
    pub fn get(&self, id: ClassificationId) -> Option<&Member<C>> { self.members.iter().find(|m| m.id == id) }
    pub fn find_child(&self, child: &C) -> Option<&Member<C>> { self.members.iter().find(|m| &m.child == child) }

    fn count(&self) -> u32 { self.members.len() as u32 }

    /// Adds `child` at `position` (clamped to `1..=len + 1`), or at the end when
    /// no position is given. Siblings at or after the slot move down by one.
    pub fn insert(&mut self, id: ClassificationId, child: C, position: Option<u32>) -> Result<Member<C>, AssociationError> {
        if self.contains(&child) { return Err(AssociationError::Duplicate); }
        let last = self.count() + 1;
        let position = position.map(|p| p.clamp(1, last)).unwrap_or(last);
        if position < last {
            for m in self.members.iter_mut().filter(|m| m.position >= position) { m.place(m.position + 1); }
        }
        let member = Member::new(id, child, position);
        self.members.push(member.clone());
        self.sort();
        Ok(member)
    }

    /// Moves a member to `new_position` (clamped to `1..=len`) with a bounded
    /// shift of the siblings in between. Returns `(old, new)` positions.
    pub fn move_to(&mut self, id: ClassificationId, new_position: u32) -> Result<(u32, u32), AssociationError> {
        let old = self.get(id).ok_or(AssociationError::MemberNotFound)?.position;
        let new = new_position.clamp(1, self.count().max(1));
        if new == old { return Ok((old, new)); }
        for m in self.members.iter_mut() {
            if m.id == id {
                m.place(new);
            } else if new < old && (new..old).contains(&m.position) {
                m.place(m.position + 1);
            } else if new > old && (old + 1..=new).contains(&m.position) {
                m.place(m.position - 1);
            }
        }
        self.sort();
        Ok((old, new))
    }

    /// Removes a member and closes the gap behind it.
    pub fn remove(&mut self, id: ClassificationId) -> Result<Member<C>, AssociationError> {
        let idx = self.members.iter().position(|m| m.id == id).ok_or(AssociationError::MemberNotFound)?;
        let removed = self.members.remove(idx);
        for m in self.members.iter_mut().filter(|m| m.position > removed.position) { m.place(m.position - 1); }
        Ok(removed)
    }

    /// Replaces the whole membership with `children`, in that order. Members
    /// already present keep their ids; new ones get ids from `mint`. Repeated
    /// children keep their first occurrence.
    pub fn reorder(&mut self, children: &[C], mut mint: impl FnMut() -> ClassificationId) -> Reordered<C> {
        let mut seen = HashSet::new();
        let wanted: Vec<&C> = children.iter().filter(|c| seen.insert(*c)).collect();

        let stale: Vec<ClassificationId> = self.members.iter().filter(|m| !seen.contains(&m.child)).map(|m| m.id).collect();
        let mut out = Reordered { removed: vec![], added: vec![] };
        for id in stale {
            if let Ok(m) = self.remove(id) { out.removed.push(m); }
        }
        for child in &wanted {
            if !self.contains(*child) {
                let last = self.count() + 1;
                let member = Member::new(mint(), (*child).clone(), last);
                self.members.push(member.clone());
                out.added.push(member);
            }
        }
        for (idx, child) in wanted.iter().enumerate() {
            if let Some(m) = self.members.iter_mut().find(|m| &m.child == *child) { m.place(idx as u32 + 1); }
        }
        self.sort();
        out
    }

    /// Verifies that positions are exactly `1..=len`.
    pub fn check_density(&self) -> Result<(), AssociationError> {
        let dense = self.members.iter().enumerate().all(|(idx, m)| m.position == idx as u32 + 1);
        if dense { Ok(()) } else { Err(AssociationError::NotDense { positions: self.positions() }) }
    }

    fn sort(&mut self) { self.members.sort_by_key(|m| m.position); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationError { Duplicate, MemberNotFound, NotDense { positions: Vec<u32> } }
impl std::error::Error for AssociationError {}
impl std::fmt::Display for AssociationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate => write!(f, "Child already present"),
            Self::MemberNotFound => write!(f, "Member not found"),
            Self::NotDense { positions } => write!(f, "Positions not dense: {positions:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn list(children: &[&'static str]) -> OrderedAssociation<u8, &'static str> {
        let mut list = OrderedAssociation::new(1);
        for c in children { list.insert(Uuid::now_v7(), *c, None).unwrap(); }
        list
    }

    fn order(list: &OrderedAssociation<u8, &'static str>) -> Vec<&'static str> { list.children().copied().collect() }

    fn id_of(list: &OrderedAssociation<u8, &'static str>, child: &'static str) -> ClassificationId { list.find_child(&child).unwrap().id }

    #[test]
    fn test_append_assigns_next_position() {
        let mut list = list(&["A", "B", "C"]);
        let m = list.insert(Uuid::now_v7(), "X", None).unwrap();
        assert_eq!(m.position, 4);
        assert_eq!(list.positions(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut list = list(&["A", "B"]);
        assert_eq!(list.insert(Uuid::now_v7(), "A", None), Err(AssociationError::Duplicate));
        assert_eq!(order(&list), vec!["A", "B"]);
    }

    #[test]
    fn test_insert_at_explicit_position_shifts_tail() {
        let mut list = list(&["A", "B", "C"]);
        list.insert(Uuid::now_v7(), "X", Some(2)).unwrap();
        assert_eq!(order(&list), vec!["A", "X", "B", "C"]);
        list.insert(Uuid::now_v7(), "Y", Some(99)).unwrap();
        assert_eq!(order(&list), vec!["A", "X", "B", "C", "Y"]);
        list.check_density().unwrap();
    }

    #[test]
    fn test_move_up_and_down() {
        let mut list = list(&["A", "B", "C", "D", "E"]);
        let e = id_of(&list, "E");
        assert_eq!(list.move_to(e, 2).unwrap(), (5, 2));
        assert_eq!(order(&list), vec!["A", "E", "B", "C", "D"]);
        let a = id_of(&list, "A");
        list.move_to(a, 4).unwrap();
        assert_eq!(order(&list), vec!["E", "B", "C", "A", "D"]);
        list.check_density().unwrap();
    }

    #[test]
    fn test_move_clamps_and_is_idempotent() {
        let mut list = list(&["A", "B", "C"]);
        let b = id_of(&list, "B");
        assert_eq!(list.move_to(b, 2).unwrap(), (2, 2));
        assert_eq!(order(&list), vec!["A", "B", "C"]);
        list.move_to(b, 0).unwrap();
        assert_eq!(order(&list), vec!["B", "A", "C"]);
        list.move_to(b, 42).unwrap();
        assert_eq!(order(&list), vec!["A", "C", "B"]);
        assert_eq!(list.positions(), vec![1, 2, 3]);
    }

    #[test]
    fn test_remove_closes_gap() {
        let mut list = list(&["A", "B", "C", "D", "E"]);
        let removed = list.remove(id_of(&list, "B")).unwrap();
        assert_eq!(removed.position, 2);
        assert_eq!(order(&list), vec!["A", "C", "D", "E"]);
        assert_eq!(list.positions(), vec![1, 2, 3, 4]);
        assert_eq!(list.remove(removed.id), Err(AssociationError::MemberNotFound));
    }

    #[test]
    fn test_reorder_keeps_ids_and_follows_given_order() {
        let mut list = list(&["A", "B", "C"]);
        let c = id_of(&list, "C");
        let out = list.reorder(&["C", "D", "A", "D"], Uuid::now_v7);
        assert_eq!(order(&list), vec!["C", "D", "A"]);
        assert_eq!(list.positions(), vec![1, 2, 3]);
        assert_eq!(id_of(&list, "C"), c);
        assert_eq!(out.removed.iter().map(|m| m.child).collect::<Vec<_>>(), vec!["B"]);
        assert_eq!(out.added.iter().map(|m| m.child).collect::<Vec<_>>(), vec!["D"]);
    }

    #[test]
    fn test_only_moved_members_are_touched() {
        let mut list = list(&["A", "B", "C"]);
        let before: Vec<_> = list.members().iter().map(|m| m.updated_at).collect();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let c = id_of(&list, "C");
        list.move_to(c, 2).unwrap();
        let a = list.find_child(&"A").unwrap();
        assert_eq!(a.updated_at, before[0]);
        assert!(list.find_child(&"B").unwrap().updated_at > before[1]);
        assert!(list.find_child(&"C").unwrap().updated_at > a.created_at);
    }

    #[test]
    fn test_density_check_detects_gap() {
        let members = vec![
            Member::new(Uuid::now_v7(), "A", 1),
            Member::new(Uuid::now_v7(), "B", 3),
        ];
        let list = OrderedAssociation::from_members(1u8, members);
        assert_eq!(list.check_density(), Err(AssociationError::NotDense { positions: vec![1, 3] }));
    }
}
