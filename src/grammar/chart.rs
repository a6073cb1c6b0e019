use std::ops::{Index, IndexMut};

/// Triangular span table with one entry per nonterminal for every
/// span `[start, end)` of a sentence.
#[derive(Debug, Clone)]
pub struct Chart<T> {
    data: Vec<T>,
    sentence_len: usize,
    num_nonterminals: usize,
}

type ChartIdx = usize;

impl<T> Chart<T>
where
    T: Clone,
{
    pub fn new(sentence_len: usize, num_nonterminals: usize, init: T) -> Self {
        Self {
            data: vec![init; (sentence_len * (sentence_len + 1) / 2) * num_nonterminals],
            sentence_len,
            num_nonterminals,
        }
    }
}

impl<T> Chart<T> {
    pub fn data(&self) -> &[T] {
        self.data.as_slice()
    }

    pub fn sentence_len(&self) -> usize {
        self.sentence_len
    }

    pub fn num_nonterminals(&self) -> usize {
        self.num_nonterminals
    }

    /// All entries of the span `[start, end)`, indexed by nonterminal.
    pub fn cell(&self, start: usize, end: usize) -> &[T] {
        let idx = self.cell_start_index(start, end - start);
        &self.data[idx..(idx + self.num_nonterminals)]
    }

    pub fn cell_mut(&mut self, start: usize, end: usize) -> &mut [T] {
        let idx = self.cell_start_index(start, end - start);
        &mut self.data[idx..(idx + self.num_nonterminals)]
    }

    pub fn get(&self, start: usize, end: usize, nonterminal: usize) -> &T {
        &self.data[self.cell_start_index(start, end - start) + nonterminal]
    }

    pub fn get_mut(&mut self, start: usize, end: usize, nonterminal: usize) -> &mut T {
        let idx = self.cell_start_index(start, end - start) + nonterminal;
        &mut self.data[idx]
    }

    /// Calculates the index for the corresponding cell.
    /// Individual cells are further subdivided for each entry.
    /// This offset has to be added afterwards.
    pub const fn cell_start_index(&self, start_pos: usize, span: usize) -> ChartIdx {
        debug_assert!(span >= 1 && start_pos + span <= self.sentence_len);
        let rows_subtract = self.sentence_len - span + 1;
        let base_cells_subtract = (rows_subtract * (rows_subtract + 1)) / 2;
        let num_base_cells = (self.sentence_len * (self.sentence_len + 1)) / 2;
        (num_base_cells - base_cells_subtract + start_pos) * self.num_nonterminals
    }
}

impl<T> Index<usize> for Chart<T> {
    type Output = T;

    fn index(&self, index: ChartIdx) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<usize> for Chart<T> {
    fn index_mut(&mut self, index: ChartIdx) -> &mut Self::Output {
        &mut self.data[index]
    }
}
