//! Output row cursor.

/// Pre-reserved row range handed to one batch-mode file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecRowReservation {
    /// First row of the range.
    pub n_row_start: usize,
    /// Rows available in the range.
    pub n_rows_capacity: usize,
}

impl SpecRowReservation {
    /// One past the last reserved row.
    pub fn n_row_end(&self) -> usize {
        self.n_row_start + self.n_rows_capacity
    }
}

/// Next writable row of one sink.
///
/// Owned by the orchestrator call that owns the sink; all moves go through
/// `&mut self`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutputCursor {
    n_row_next: usize,
}

impl OutputCursor {
    /// Cursor starting at `n_row_start`.
    pub fn new(n_row_start: usize) -> Self {
        Self {
            n_row_next: n_row_start,
        }
    }

    /// Next writable row.
    pub fn position(&self) -> usize {
        self.n_row_next
    }

    /// Return the current row and advance by one.
    pub fn take_row(&mut self) -> usize {
        let n_row = self.n_row_next;
        self.n_row_next += 1;
        n_row
    }

    /// Move back to `n_row`, used after a discarded segment.
    pub fn rewind_to(&mut self, n_row: usize) {
        self.n_row_next = self.n_row_next.min(n_row);
    }

    /// Disjoint consecutive ranges of `n_rows_per_slot` rows, starting at the cursor.
    ///
    /// The cursor itself does not move; replay advances it row by row.
    pub fn reserve(&self, n_slots: usize, n_rows_per_slot: usize) -> Vec<SpecRowReservation> {
        (0..n_slots)
            .map(|n_idx| SpecRowReservation {
                n_row_start: self.n_row_next + n_idx * n_rows_per_slot,
                n_rows_capacity: n_rows_per_slot,
            })
            .collect()
    }
}
