use std::borrow::Borrow;
use std::hash::Hash;

use fxhash::FxHashMap;

/// Bidirectional mapping between symbols and dense `u32` indices.
#[derive(Debug, Clone)]
pub struct SymbolTable<N>
where
    N: Eq + Hash,
{
    lookup: Vec<N>,
    lookup_index: FxHashMap<N, u32>,
}

impl<N> SymbolTable<N>
where
    N: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            lookup: vec![],
            lookup_index: FxHashMap::default(),
        }
    }

    pub fn intify(&mut self, n: N) -> u32 {
        self.lookup_index.get(&n).copied().unwrap_or_else(|| {
            let index = self.lookup.len() as u32;
            self.lookup.push(n.clone());
            self.lookup_index.insert(n, index);
            index
        })
    }

    pub fn index<Q>(&self, n: &Q) -> Option<u32>
    where
        N: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lookup_index.get(n).copied()
    }

    pub fn symbol(&self, index: u32) -> &N {
        &self.lookup[index as usize]
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

impl<N> Default for SymbolTable<N>
where
    N: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
