//! Ordered intrusive lists over the task arena
//!
//! Every task embeds two [`ListItem`]s: a state item (ready, delayed or
//! suspended list) and an event item (a queue wait list or the pending
//! ready list). Lists never own their items; they store [`ItemRef`]s into
//! an [`ItemStore`] and link them into a circle closed by an implicit end
//! marker. A link of `None` means "the end marker".
//!
//! Items are kept in non-decreasing key order. The end marker carries the
//! largest key, so a walk from the marker visits the smallest key first.
//!
//! Lists are not synchronised. Callers hold a critical section.

use crate::task::TaskHandle;
use crate::types::{OsPrio, OsTick};

/// Ordering key: a wake tick, or `CFG_MAX_PRIORITIES - priority` for waits
pub type ItemKey = OsTick;

/// Key held by the end marker
pub const KEY_MAX: ItemKey = ItemKey::MAX;

/// Identifies a list, so an item knows which list contains it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListId {
    /// Ready list for one priority
    Ready(OsPrio),
    /// One of the two delayed lists, by physical slot
    Delayed(u8),
    /// Suspended and indefinitely blocked tasks
    Suspended,
    /// Tasks readied while the scheduler was suspended
    PendingReady,
    /// A kernel object's wait list
    Event(u16),
}

/// Which of a task's two embedded items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    State,
    Event,
}

/// Stable reference to one embedded item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub owner: TaskHandle,
    pub kind: ItemKind,
}

impl ItemRef {
    #[inline]
    pub const fn state(owner: TaskHandle) -> Self {
        Self { owner, kind: ItemKind::State }
    }

    #[inline]
    pub const fn event(owner: TaskHandle) -> Self {
        Self { owner, kind: ItemKind::Event }
    }
}

/// A list node embedded in a task
#[derive(Debug, Clone, Copy)]
pub struct ListItem {
    pub(crate) key: ItemKey,
    next: Option<ItemRef>,
    prev: Option<ItemRef>,
    container: Option<ListId>,
}

impl ListItem {
    pub const fn new() -> Self {
        Self {
            key: 0,
            next: None,
            prev: None,
            container: None,
        }
    }

    /// The list currently holding this item
    #[inline]
    pub fn container(&self) -> Option<ListId> {
        self.container
    }

    #[inline]
    pub fn key(&self) -> ItemKey {
        self.key
    }
}

impl Default for ListItem {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage that resolves [`ItemRef`]s to their items
pub trait ItemStore {
    fn item(&self, r: ItemRef) -> &ListItem;
    fn item_mut(&mut self, r: ItemRef) -> &mut ListItem;
}

/// Key-ordered circular list with a round-robin cursor
#[derive(Debug, Clone, Copy)]
pub struct OrderedList {
    id: ListId,
    len: usize,
    /// End marker's `next`
    head: Option<ItemRef>,
    /// End marker's `prev`
    tail: Option<ItemRef>,
    /// `None` while the cursor rests on the end marker
    cursor: Option<ItemRef>,
}

impl OrderedList {
    pub const fn new(id: ListId) -> Self {
        Self {
            id,
            len: 0,
            head: None,
            tail: None,
            cursor: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ListId {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if `r` is linked into this list
    #[inline]
    pub fn contains<S: ItemStore>(&self, store: &S, r: ItemRef) -> bool {
        store.item(r).container == Some(self.id)
    }

    /// First item after the end marker
    #[inline]
    pub fn head(&self) -> Option<ItemRef> {
        self.head
    }

    /// Owner of the first item, the lowest key
    #[inline]
    pub fn head_owner(&self) -> Option<TaskHandle> {
        self.head.map(|r| r.owner)
    }

    /// Key of the first item
    #[inline]
    pub fn head_key<S: ItemStore>(&self, store: &S) -> Option<ItemKey> {
        self.head.map(|r| store.item(r).key)
    }

    fn next_of<S: ItemStore>(&self, store: &S, link: Option<ItemRef>) -> Option<ItemRef> {
        match link {
            None => self.head,
            Some(r) => store.item(r).next,
        }
    }

    fn prev_of<S: ItemStore>(&self, store: &S, link: Option<ItemRef>) -> Option<ItemRef> {
        match link {
            None => self.tail,
            Some(r) => store.item(r).prev,
        }
    }

    fn set_next<S: ItemStore>(&mut self, store: &mut S, link: Option<ItemRef>, to: Option<ItemRef>) {
        match link {
            None => self.head = to,
            Some(r) => store.item_mut(r).next = to,
        }
    }

    fn set_prev<S: ItemStore>(&mut self, store: &mut S, link: Option<ItemRef>, to: Option<ItemRef>) {
        match link {
            None => self.tail = to,
            Some(r) => store.item_mut(r).prev = to,
        }
    }

    fn link_between<S: ItemStore>(
        &mut self,
        store: &mut S,
        prev: Option<ItemRef>,
        next: Option<ItemRef>,
        r: ItemRef,
    ) {
        debug_assert!(store.item(r).container.is_none(), "item already linked");

        {
            let item = store.item_mut(r);
            item.prev = prev;
            item.next = next;
            item.container = Some(self.id);
        }
        self.set_next(store, prev, Some(r));
        self.set_prev(store, next, Some(r));
        self.len += 1;
    }

    /// Insert `r` just before the cursor, making it the last item the
    /// cursor reaches. Keys are ignored.
    pub fn insert_end<S: ItemStore>(&mut self, store: &mut S, r: ItemRef) {
        let next = self.cursor;
        let prev = self.prev_of(&*store, next);
        self.link_between(store, prev, next, r);
    }

    /// Insert `r` in key order, after any items with an equal key.
    pub fn insert<S: ItemStore>(&mut self, store: &mut S, r: ItemRef) {
        let key = store.item(r).key;

        // The end marker shares KEY_MAX; go straight to the back
        let prev = if key == KEY_MAX {
            self.tail
        } else {
            let mut at: Option<ItemRef> = None;
            while let Some(next) = self.next_of(&*store, at) {
                if store.item(next).key > key {
                    break;
                }
                at = Some(next);
            }
            at
        };

        let next = self.next_of(&*store, prev);
        self.link_between(store, prev, next, r);
    }

    /// Unlink `r` and return the number of items left.
    ///
    /// A cursor resting on `r` falls back to its predecessor.
    pub fn remove<S: ItemStore>(&mut self, store: &mut S, r: ItemRef) -> usize {
        debug_assert_eq!(store.item(r).container, Some(self.id), "item not in this list");

        let (prev, next) = {
            let item = store.item(r);
            (item.prev, item.next)
        };
        self.set_next(store, prev, next);
        self.set_prev(store, next, prev);

        if self.cursor == Some(r) {
            self.cursor = prev;
        }

        let item = store.item_mut(r);
        item.prev = None;
        item.next = None;
        item.container = None;

        self.len -= 1;
        self.len
    }

    /// Remove the first item and return its owner
    pub fn pop_owner_of_head<S: ItemStore>(&mut self, store: &mut S) -> Option<TaskHandle> {
        let head = self.head?;
        self.remove(store, head);
        Some(head.owner)
    }

    /// Move the cursor to the next item, skipping the end marker, and
    /// return that item's owner.
    pub fn advance_cursor_and_get_owner<S: ItemStore>(&mut self, store: &S) -> Option<TaskHandle> {
        if self.len == 0 {
            return None;
        }
        let next = match self.next_of(store, self.cursor) {
            None => self.head,
            some => some,
        };
        self.cursor = next;
        next.map(|r| r.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Items addressed directly by handle index, two per handle
    struct Items(Vec<ListItem>);

    impl Items {
        fn new(tasks: usize) -> Self {
            Self(vec![ListItem::new(); tasks * 2])
        }

        fn keyed(&mut self, task: u16, key: ItemKey) -> ItemRef {
            let r = ItemRef::state(TaskHandle::from_index(task as usize));
            self.item_mut(r).key = key;
            r
        }
    }

    impl ItemStore for Items {
        fn item(&self, r: ItemRef) -> &ListItem {
            &self.0[slot(r)]
        }
        fn item_mut(&mut self, r: ItemRef) -> &mut ListItem {
            &mut self.0[slot(r)]
        }
    }

    fn slot(r: ItemRef) -> usize {
        r.owner.index() * 2 + matches!(r.kind, ItemKind::Event) as usize
    }

    fn owners(list: &OrderedList, items: &Items) -> Vec<usize> {
        let mut out = Vec::new();
        let mut at = list.head();
        while let Some(r) = at {
            out.push(r.owner.index());
            at = items.item(r).next;
        }
        out
    }

    #[test]
    fn test_insert_keeps_key_order() {
        let mut items = Items::new(5);
        let mut list = OrderedList::new(ListId::Delayed(0));

        for (task, key) in [(0, 30), (1, 10), (2, 20), (3, 5), (4, 25)] {
            let r = items.keyed(task, key);
            list.insert(&mut items, r);
        }

        assert_eq!(list.len(), 5);
        assert_eq!(owners(&list, &items), vec![3, 1, 2, 4, 0]);
        assert_eq!(list.head_key(&items), Some(5));
    }

    #[test]
    fn test_equal_keys_keep_arrival_order() {
        let mut items = Items::new(4);
        let mut list = OrderedList::new(ListId::Event(0));

        for (task, key) in [(0, 4), (1, 2), (2, 4), (3, 4)] {
            let r = items.keyed(task, key);
            list.insert(&mut items, r);
        }

        assert_eq!(owners(&list, &items), vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_max_key_goes_to_back() {
        let mut items = Items::new(3);
        let mut list = OrderedList::new(ListId::Delayed(1));

        let a = items.keyed(0, KEY_MAX);
        list.insert(&mut items, a);
        let b = items.keyed(1, 7);
        list.insert(&mut items, b);
        let c = items.keyed(2, KEY_MAX);
        list.insert(&mut items, c);

        assert_eq!(owners(&list, &items), vec![1, 0, 2]);
    }

    #[test]
    fn test_remove_and_container() {
        let mut items = Items::new(3);
        let mut list = OrderedList::new(ListId::Suspended);
        let refs: Vec<_> = (0..3).map(|t| items.keyed(t, 0)).collect();
        for &r in &refs {
            list.insert_end(&mut items, r);
        }

        assert!(list.contains(&items, refs[1]));
        assert_eq!(list.remove(&mut items, refs[1]), 2);
        assert!(!list.contains(&items, refs[1]));
        assert_eq!(items.item(refs[1]).container(), None);
        assert_eq!(owners(&list, &items), vec![0, 2]);

        assert_eq!(list.pop_owner_of_head(&mut items), Some(TaskHandle::from_index(0)));
        assert_eq!(list.pop_owner_of_head(&mut items), Some(TaskHandle::from_index(2)));
        assert_eq!(list.pop_owner_of_head(&mut items), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_cursor_round_robin() {
        let mut items = Items::new(3);
        let mut list = OrderedList::new(ListId::Ready(1));
        for t in 0..3 {
            let r = items.keyed(t, 0);
            list.insert_end(&mut items, r);
        }

        let visits: Vec<_> = (0..6)
            .filter_map(|_| list.advance_cursor_and_get_owner(&items))
            .map(|h| h.index())
            .collect();
        assert_eq!(visits, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_insert_end_lands_behind_cursor() {
        let mut items = Items::new(4);
        let mut list = OrderedList::new(ListId::Ready(2));
        for t in 0..3 {
            let r = items.keyed(t, 0);
            list.insert_end(&mut items, r);
        }

        // Cursor on task 0, as if it were running
        assert_eq!(list.advance_cursor_and_get_owner(&items).map(|h| h.index()), Some(0));

        let late = items.keyed(3, 0);
        list.insert_end(&mut items, late);

        let visits: Vec<_> = (0..4)
            .filter_map(|_| list.advance_cursor_and_get_owner(&items))
            .map(|h| h.index())
            .collect();
        assert_eq!(visits, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_removing_cursor_item_steps_back() {
        let mut items = Items::new(3);
        let mut list = OrderedList::new(ListId::Ready(3));
        let refs: Vec<_> = (0..3).map(|t| items.keyed(t, 0)).collect();
        for &r in &refs {
            list.insert_end(&mut items, r);
        }

        list.advance_cursor_and_get_owner(&items);
        list.advance_cursor_and_get_owner(&items);
        // Cursor on task 1
        list.remove(&mut items, refs[1]);

        assert_eq!(list.advance_cursor_and_get_owner(&items).map(|h| h.index()), Some(2));
        assert_eq!(list.advance_cursor_and_get_owner(&items).map(|h| h.index()), Some(0));
    }

    #[test]
    fn test_empty_list_has_no_owner() {
        let items = Items::new(1);
        let mut list = OrderedList::new(ListId::PendingReady);
        assert_eq!(list.advance_cursor_and_get_owner(&items), None);
        assert_eq!(list.head_owner(), None);
        assert_eq!(list.head_key(&items), None);
    }
}
