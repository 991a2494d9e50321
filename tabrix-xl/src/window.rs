//! Row window
//!
//! Metadata of one batch of rows: the range it spans and, for every row number present, the
//! slot the row occupies in the batch. Row numbers inside the range without a slot had no
//! xml representation.

use serde::{Deserialize, Serialize};

use crate::Row;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWindow {
    min_row: u32,
    max_row: u32,
    /// `(row - min_row, slot)`, sorted by offset, offsets unique
    slots: Vec<(u32, u32)>,
}

impl RowWindow {
    /// Index a batch of rows in stream order. `None` for an empty batch.
    ///
    /// When a row number shows up twice, the first row wins.
    pub fn from_rows(rows: &[Row]) -> Option<Self> {
        let min_row = rows.iter().map(Row::index).min()?;
        let max_row = rows.iter().map(Row::index).max()?;

        let mut offsets: Vec<(u32, u32)> = rows
            .iter()
            .enumerate()
            .map(|(slot, row)| (row.index() - min_row, slot as u32))
            .collect();
        // stable: equal offsets stay in stream order
        offsets.sort_by_key(|(offset, _)| *offset);
        offsets.dedup_by_key(|(offset, _)| *offset);
        let slots = offsets;

        Some(Self {
            min_row,
            max_row,
            slots,
        })
    }

    pub fn min_row(&self) -> u32 {
        self.min_row
    }

    pub fn max_row(&self) -> u32 {
        self.max_row
    }

    /// Number of distinct rows held
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn spans(&self, row: u32) -> bool {
        (self.min_row..=self.max_row).contains(&row)
    }

    /// Slot of `row` in the batch, `None` when the row is absent.
    pub fn slot_of(&self, row: u32) -> Option<usize> {
        if !self.spans(row) {
            return None;
        }
        let offset = row - self.min_row;
        self.slots
            .binary_search_by_key(&offset, |(o, _)| *o)
            .ok()
            .map(|i| self.slots[i].1 as usize)
    }

    /// The `nth` row present, in ascending row order, as `(row, slot)`
    pub fn entry(&self, nth: usize) -> Option<(u32, usize)> {
        self.slots
            .get(nth)
            .map(|(offset, slot)| (self.min_row + offset, *slot as usize))
    }

    /// Row numbers present, ascending
    pub fn row_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().map(move |(offset, _)| self.min_row + offset)
    }
}

#[cfg(test)]
mod test_window {
    use super::*;

    fn rows(indices: &[u32]) -> Vec<Row> {
        indices.iter().map(|i| Row::new(*i, false)).collect()
    }

    #[test]
    fn sparse_slots() {
        let window = RowWindow::from_rows(&rows(&[3, 4, 8])).unwrap();
        assert_eq!(window.min_row(), 3);
        assert_eq!(window.max_row(), 8);
        assert_eq!(window.len(), 3);
        assert_eq!(window.slot_of(3), Some(0));
        assert_eq!(window.slot_of(8), Some(2));
        // inside the range but never seen
        assert_eq!(window.slot_of(6), None);
        assert_eq!(window.slot_of(2), None);
        assert_eq!(window.slot_of(9), None);
        assert_eq!(window.row_numbers().collect::<Vec<_>>(), vec![3, 4, 8]);
        assert_eq!(window.entry(1), Some((4, 1)));
        assert_eq!(window.entry(3), None);
    }

    #[test]
    fn first_duplicate_wins() {
        let window = RowWindow::from_rows(&rows(&[1, 2, 2])).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window.slot_of(2), Some(1));
    }

    #[test]
    fn empty_batch() {
        assert!(RowWindow::from_rows(&[]).is_none());
    }
}
