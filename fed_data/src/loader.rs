use ndarray::ArrayView2;

use crate::dataset::InMemoryDataset;

/// A borrowed mini-batch: feature rows plus their labels.
#[derive(Debug, Clone, Copy)]
pub struct BatchRef<'a> {
    pub features: ArrayView2<'a, f32>,
    pub labels: &'a [usize],
}

impl<'a> BatchRef<'a> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Mini-batch cursor over a dataset, producing borrowed batches.
#[derive(Debug, Clone)]
pub struct DataLoader<'a> {
    dataset: &'a InMemoryDataset,
    batch_size: usize,
    cursor: usize,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a InMemoryDataset, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            cursor: 0,
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Returns the next batch, or `None` once the dataset is exhausted.
    pub fn next_batch(&mut self) -> Option<BatchRef<'a>> {
        if self.cursor >= self.dataset.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.dataset.len());
        let features = self
            .dataset
            .features()
            .slice_move(ndarray::s![self.cursor..end, ..]);
        let labels = &self.dataset.labels()[self.cursor..end];
        self.cursor = end;
        Some(BatchRef { features, labels })
    }
}

impl<'a> Iterator for DataLoader<'a> {
    type Item = BatchRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn batches_respect_batch_size() {
        let ds = InMemoryDataset::new(Array2::zeros((5, 2)), vec![0, 1, 2, 3, 4]).unwrap();
        let mut dl = DataLoader::new(&ds, 2);
        assert_eq!(dl.num_batches(), 3);

        assert_eq!(dl.next_batch().unwrap().labels, &[0, 1]);
        assert_eq!(dl.next_batch().unwrap().labels, &[2, 3]);
        assert_eq!(dl.next_batch().unwrap().labels, &[4]);
        assert!(dl.next_batch().is_none());

        dl.reset();
        assert_eq!(dl.next_batch().unwrap().labels, &[0, 1]);
    }

    #[test]
    fn loader_is_an_iterator() {
        let ds = InMemoryDataset::new(Array2::zeros((4, 1)), vec![0, 0, 1, 1]).unwrap();
        let total: usize = DataLoader::new(&ds, 3).map(|b| b.len()).sum();
        assert_eq!(total, 4);
    }
}
