//! Index-linked task lists
//!
//! Every TCB carries two links: a state link (ready, delayed, suspended,
//! terminated) and an event link (an object's wait list, or the
//! pending-ready list). Links name their neighbours by table index, so a
//! list header is three bytes and no pointer into the TCB table escapes.

use crate::types::Priority;

/// Which list a link currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Container {
    Ready(Priority),
    /// Physical delayed list (0 or 1); the two swap roles on tick wrap
    Delayed(u8),
    Suspended,
    Terminated,
    PendingReady,
    /// Blocked on a queue; `sending` selects the senders list
    Waiting { queue: u8, sending: bool },
}

/// Which of the two TCB links a list threads through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkKind {
    State,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    pub(crate) prev: Option<u8>,
    pub(crate) next: Option<u8>,
    /// Sort key: wake tick for delayed lists, inverted priority for waits
    pub(crate) value: u32,
    pub(crate) container: Option<Container>,
}

impl Link {
    pub(crate) const EMPTY: Self = Self {
        prev: None,
        next: None,
        value: 0,
        container: None,
    };
}

/// Storage that owns the links of every list node
pub(crate) trait LinkTable {
    fn link(&self, idx: u8, kind: LinkKind) -> &Link;
    fn link_mut(&mut self, idx: u8, kind: LinkKind) -> &mut Link;
}

/// Doubly linked list of task indices
#[derive(Debug, Clone, Copy)]
pub(crate) struct TaskList {
    head: Option<u8>,
    tail: Option<u8>,
    len: u8,
}

impl TaskList {
    pub(crate) const fn new() -> Self {
        TaskList {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len as usize
    }

    #[inline(always)]
    pub(crate) fn head(&self) -> Option<u8> {
        self.head
    }

    /// Key of the first entry
    pub(crate) fn head_value<T: LinkTable>(&self, table: &T, kind: LinkKind) -> Option<u32> {
        self.head.map(|h| table.link(h, kind).value)
    }

    #[inline]
    pub(crate) fn next<T: LinkTable>(table: &T, idx: u8, kind: LinkKind) -> Option<u8> {
        table.link(idx, kind).next
    }

    /// Append at the tail
    pub(crate) fn push_back<T: LinkTable>(&mut self, table: &mut T, idx: u8, kind: LinkKind, container: Container) {
        let tail = self.tail;
        {
            let link = table.link_mut(idx, kind);
            debug_assert!(link.container.is_none());
            link.prev = tail;
            link.next = None;
            link.container = Some(container);
        }
        match tail {
            Some(t) => table.link_mut(t, kind).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Insert keeping ascending `value`; equal keys keep arrival order
    pub(crate) fn insert_ordered<T: LinkTable>(
        &mut self,
        table: &mut T,
        idx: u8,
        kind: LinkKind,
        container: Container,
        value: u32,
    ) {
        let mut after: Option<u8> = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            let link = table.link(c, kind);
            if link.value > value {
                break;
            }
            after = Some(c);
            cursor = link.next;
        }

        {
            let link = table.link_mut(idx, kind);
            debug_assert!(link.container.is_none());
            link.value = value;
            link.prev = after;
            link.next = cursor;
            link.container = Some(container);
        }
        match after {
            Some(a) => table.link_mut(a, kind).next = Some(idx),
            None => self.head = Some(idx),
        }
        match cursor {
            Some(c) => table.link_mut(c, kind).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.len += 1;
    }

    /// Unlink `idx`; its container tag is cleared
    pub(crate) fn remove<T: LinkTable>(&mut self, table: &mut T, idx: u8, kind: LinkKind) {
        let (prev, next) = {
            let link = table.link_mut(idx, kind);
            let pair = (link.prev, link.next);
            link.prev = None;
            link.next = None;
            link.container = None;
            pair
        };
        match prev {
            Some(p) => table.link_mut(p, kind).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => table.link_mut(n, kind).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Remove and return the head
    pub(crate) fn pop_front<T: LinkTable>(&mut self, table: &mut T, kind: LinkKind) -> Option<u8> {
        let head = self.head?;
        self.remove(table, head, kind);
        Some(head)
    }

    /// Move `idx` behind every other entry
    pub(crate) fn move_to_back<T: LinkTable>(&mut self, table: &mut T, idx: u8, kind: LinkKind) {
        if self.tail == Some(idx) {
            return;
        }
        let container = match table.link(idx, kind).container {
            Some(c) => c,
            None => return,
        };
        self.remove(table, idx, kind);
        self.push_back(table, idx, kind, container);
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nodes([[Link; 2]; 8]);

    impl Nodes {
        fn new() -> Self {
            Nodes([[Link::EMPTY; 2]; 8])
        }
    }

    impl LinkTable for Nodes {
        fn link(&self, idx: u8, kind: LinkKind) -> &Link {
            &self.0[idx as usize][kind as usize]
        }
        fn link_mut(&mut self, idx: u8, kind: LinkKind) -> &mut Link {
            &mut self.0[idx as usize][kind as usize]
        }
    }

    fn collect(list: &TaskList, nodes: &Nodes, kind: LinkKind) -> ([u8; 8], usize) {
        let mut out = [0u8; 8];
        let mut n = 0;
        let mut cur = list.head();
        while let Some(i) = cur {
            out[n] = i;
            n += 1;
            cur = TaskList::next(nodes, i, kind);
        }
        (out, n)
    }

    #[test]
    fn push_and_remove() {
        let mut nodes = Nodes::new();
        let mut list = TaskList::new();
        for i in 0..4 {
            list.push_back(&mut nodes, i, LinkKind::State, Container::Suspended);
        }
        assert_eq!(list.len(), 4);
        list.remove(&mut nodes, 2, LinkKind::State);
        let (order, n) = collect(&list, &nodes, LinkKind::State);
        assert_eq!(&order[..n], &[0, 1, 3]);
        assert_eq!(nodes.link(2, LinkKind::State).container, None);
        assert_eq!(list.pop_front(&mut nodes, LinkKind::State), Some(0));
        assert_eq!(list.pop_front(&mut nodes, LinkKind::State), Some(1));
        assert_eq!(list.pop_front(&mut nodes, LinkKind::State), Some(3));
        assert!(list.is_empty());
        assert_eq!(list.pop_front(&mut nodes, LinkKind::State), None);
    }

    #[test]
    fn ordered_insert_is_stable() {
        let mut nodes = Nodes::new();
        let mut list = TaskList::new();
        let c = Container::Delayed(0);
        list.insert_ordered(&mut nodes, 0, LinkKind::State, c, 30);
        list.insert_ordered(&mut nodes, 1, LinkKind::State, c, 10);
        list.insert_ordered(&mut nodes, 2, LinkKind::State, c, 30);
        list.insert_ordered(&mut nodes, 3, LinkKind::State, c, 20);
        list.insert_ordered(&mut nodes, 4, LinkKind::State, c, 10);
        let (order, n) = collect(&list, &nodes, LinkKind::State);
        assert_eq!(&order[..n], &[1, 4, 3, 0, 2]);
        assert_eq!(list.head_value(&nodes, LinkKind::State), Some(10));
    }

    #[test]
    fn links_are_independent() {
        let mut nodes = Nodes::new();
        let mut ready = TaskList::new();
        let mut waiters = TaskList::new();
        ready.push_back(&mut nodes, 5, LinkKind::State, Container::Ready(3));
        waiters.push_back(&mut nodes, 5, LinkKind::Event, Container::PendingReady);
        ready.remove(&mut nodes, 5, LinkKind::State);
        assert_eq!(waiters.head(), Some(5));
        assert_eq!(nodes.link(5, LinkKind::Event).container, Some(Container::PendingReady));
    }

    #[test]
    fn move_to_back_rotates() {
        let mut nodes = Nodes::new();
        let mut list = TaskList::new();
        for i in 0..3 {
            list.push_back(&mut nodes, i, LinkKind::State, Container::Ready(1));
        }
        list.move_to_back(&mut nodes, 0, LinkKind::State);
        let (order, n) = collect(&list, &nodes, LinkKind::State);
        assert_eq!(&order[..n], &[1, 2, 0]);
        assert_eq!(nodes.link(0, LinkKind::State).container, Some(Container::Ready(1)));
    }
}
