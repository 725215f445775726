use crate::core::PageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeallocKind {
    Page,
    Train,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeallocElem {
    pub kind: DeallocKind,
    pub pid: PageId,
}

/// Caller-owned queue of pages to free once the current batch of work is
/// done. Operations only ever prepend; draining happens through
/// `Engine::apply_dealloc`.
#[derive(Debug, Default)]
pub struct DeallocList {
    elems: Vec<DeallocElem>,
}

impl DeallocList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an element; the most recently added is the head.
    pub fn prepend(&mut self, kind: DeallocKind, pid: PageId) {
        self.elems.push(DeallocElem { kind, pid });
    }

    pub fn head(&self) -> Option<&DeallocElem> {
        self.elems.last()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Head-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &DeallocElem> {
        self.elems.iter().rev()
    }

    /// Remove and return all elements, head first.
    pub fn drain(&mut self) -> Vec<DeallocElem> {
        let mut elems = std::mem::take(&mut self.elems);
        elems.reverse();
        elems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_makes_the_newest_element_the_head() {
        let mut dl = DeallocList::new();
        dl.prepend(DeallocKind::Page, PageId::new(0, 5));
        dl.prepend(DeallocKind::Page, PageId::new(0, 9));

        assert_eq!(dl.len(), 2);
        assert_eq!(dl.head().unwrap().pid, PageId::new(0, 9));

        let drained = dl.drain();
        assert_eq!(drained[0].pid, PageId::new(0, 9));
        assert_eq!(drained[1].pid, PageId::new(0, 5));
        assert!(dl.is_empty());
    }
}
