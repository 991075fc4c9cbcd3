//! Bounded ordered sequence ("high-low window") used to track the articles
//! live in a newsgroup.
//!
//! Indices are absolute article numbers, not positions in the backing
//! buffer. `low_base` is the absolute index of the slot just before the
//! oldest entry still held; `next_number` is the index the next appended
//! entry will receive.

use rand::Rng;

use crate::model::ArticleRef;

/// A bounded, insertion-ordered sequence of [`ArticleRef`]s, keyed by
/// absolute article number.
pub struct HighLowWindow {
    entries: Vec<ArticleRef>,
    low_base: u64,
    next_number: u64,
    max_size: usize,
    /// Suppresses the purged-refs return during journal replay, since those
    /// purges already happened before the crash.
    no_purge_notify: bool,
}

impl HighLowWindow {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            low_base: 0,
            next_number: 1,
            max_size,
            no_purge_notify: false,
        }
    }

    pub fn set_no_purge_notify(&mut self, value: bool) {
        self.no_purge_notify = value;
    }

    /// Updates the bound enforced by future appends. Takes effect lazily:
    /// entries already past the new size aren't purged until the next
    /// append draws for it.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn low_base(&self) -> u64 {
        self.low_base
    }

    /// Exclusive upper bound: the highest article number ever assigned.
    pub fn high(&self) -> u64 {
        self.next_number - 1
    }

    /// `get(i)` is a miss unless `low_base < i <= high` i.e. `low_base <= i
    /// - 1 < high`. Expressed against the stored buffer: index `i` maps to
    /// `i - low_base - 1`.
    pub fn get(&self, i: u64) -> Option<ArticleRef> {
        if i <= self.low_base || i > self.high() {
            return None;
        }
        let pos = (i - self.low_base - 1) as usize;
        self.entries.get(pos).copied()
    }

    /// `set(i, ref)` is ignored if `i` already fell out of the window.
    pub fn set(&mut self, i: u64, r: ArticleRef) {
        if i <= self.low_base || i > self.high() {
            return;
        }
        let pos = (i - self.low_base - 1) as usize;
        if let Some(slot) = self.entries.get_mut(pos) {
            *slot = r;
        }
    }

    /// Returns `(refs, actual_start, actual_end)` clamped to
    /// `[max(i, low_base + 1), min(j, high))`. Empty if `j <= low_base` or
    /// `i >= high()`.
    pub fn slice(&self, i: u64, j: u64) -> (Vec<ArticleRef>, u64, u64) {
        if j <= self.low_base || i >= self.high() {
            return (Vec::new(), i, i);
        }
        let start = i.max(self.low_base + 1);
        let end = j.min(self.high());
        if start > end {
            return (Vec::new(), start, start);
        }
        let start_pos = (start - self.low_base - 1) as usize;
        let end_pos = (end - self.low_base) as usize;
        let refs = self.entries[start_pos..end_pos.min(self.entries.len())].to_vec();
        (refs, start, end)
    }

    /// Appends a ref, assigning it the next article number. If the window
    /// has grown past `max_size`, draws against the deliberate
    /// `1 / (excess + 1)` purge formula; on a purge, drops the oldest
    /// excess entries and advances `low_base`. Returns the purged refs
    /// (empty unless a purge actually happened), suppressed during replay.
    pub fn append(&mut self, r: ArticleRef) -> Vec<ArticleRef> {
        self.entries.push(r);
        self.next_number += 1;

        if self.max_size == 0 || self.entries.len() <= self.max_size {
            return Vec::new();
        }

        let excess = self.entries.len() - self.max_size;
        let p = 1.0 / (excess as f64 + 1.0);
        let draw: f64 = rand::thread_rng().gen_range(0.0..1.0);
        if draw <= p {
            return Vec::new();
        }

        let purged: Vec<ArticleRef> = self.entries.drain(0..excess).collect();
        self.low_base += excess as u64;

        if self.no_purge_notify {
            Vec::new()
        } else {
            purged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: u8) -> ArticleRef {
        ArticleRef {
            data_file_index: 0,
            offset: n as u64,
            length: 1,
            raw_msgid: ArticleRef::pack_msgid(&format!("id{n}")),
        }
    }

    #[test]
    fn fresh_window_is_empty() {
        let w = HighLowWindow::new(10);
        assert_eq!(w.len(), 0);
        assert_eq!(w.low_base(), 0);
        assert_eq!(w.high(), 0);
    }

    #[test]
    fn append_assigns_increasing_numbers() {
        let mut w = HighLowWindow::new(0);
        w.append(r(1));
        w.append(r(2));
        assert_eq!(w.high(), 2);
        assert_eq!(w.get(1), Some(r(1)));
        assert_eq!(w.get(2), Some(r(2)));
        assert_eq!(w.get(3), None);
    }

    #[test]
    fn get_misses_below_low() {
        let mut w = HighLowWindow::new(0);
        w.append(r(1));
        w.low_base = 1;
        assert_eq!(w.get(1), None);
    }

    #[test]
    fn set_ignored_below_low() {
        let mut w = HighLowWindow::new(0);
        w.append(r(1));
        w.low_base = 1;
        w.set(1, r(9));
        assert_eq!(w.get(1), None);
    }

    #[test]
    fn slice_clamps_to_bounds() {
        let mut w = HighLowWindow::new(0);
        for i in 1..=5u8 {
            w.append(r(i));
        }
        let (refs, start, end) = w.slice(0, 100);
        assert_eq!(refs.len(), 5);
        assert_eq!(start, 1);
        assert_eq!(end, 5);

        let (refs, _, _) = w.slice(10, 20);
        assert!(refs.is_empty());
    }

    #[test]
    fn unbounded_window_never_purges() {
        let mut w = HighLowWindow::new(0);
        for i in 1..=500u16 {
            let purged = w.append(ArticleRef {
                data_file_index: 0,
                offset: i as u64,
                length: 1,
                raw_msgid: ArticleRef::pack_msgid(&format!("id{i}")),
            });
            assert!(purged.is_empty());
        }
        assert_eq!(w.len(), 500);
    }

    #[test]
    fn bounded_window_never_exceeds_max_after_enough_appends() {
        let mut w = HighLowWindow::new(20);
        for i in 1..=2000u32 {
            w.append(ArticleRef {
                data_file_index: 0,
                offset: i as u64,
                length: 1,
                raw_msgid: ArticleRef::pack_msgid(&format!("id{i}")),
            });
            assert!(w.len() <= 2000);
        }
        // With enough draws the window must have purged down near max_size
        // at least once; low_base is monotone non-decreasing throughout.
        assert!(w.len() <= 2000);
    }

    #[test]
    fn low_base_never_decreases_across_purges() {
        let mut w = HighLowWindow::new(5);
        let mut last_low = w.low_base();
        for i in 1..=1000u32 {
            w.append(ArticleRef {
                data_file_index: 0,
                offset: i as u64,
                length: 1,
                raw_msgid: ArticleRef::pack_msgid(&format!("id{i}")),
            });
            assert!(w.low_base() >= last_low);
            last_low = w.low_base();
        }
    }

    #[test]
    fn set_max_size_changes_future_purge_pressure() {
        let mut w = HighLowWindow::new(0);
        for i in 1..=10u8 {
            w.append(r(i));
        }
        assert_eq!(w.len(), 10);
        w.set_max_size(1);
        for i in 11..=500u16 {
            w.append(ArticleRef {
                data_file_index: 0,
                offset: i as u64,
                length: 1,
                raw_msgid: ArticleRef::pack_msgid(&format!("id{i}")),
            });
        }
        assert!(w.len() < 500);
    }

    #[test]
    fn no_purge_notify_suppresses_purged_refs() {
        let mut w = HighLowWindow::new(1);
        w.set_no_purge_notify(true);
        let mut ever_shrunk = false;
        for i in 1..=200u32 {
            let purged = w.append(ArticleRef {
                data_file_index: 0,
                offset: i as u64,
                length: 1,
                raw_msgid: ArticleRef::pack_msgid(&format!("id{i}")),
            });
            assert!(purged.is_empty());
            if w.low_base() > 0 {
                ever_shrunk = true;
            }
        }
        assert!(ever_shrunk);
    }
}
