/// Row-major `f64` array with a fixed shape.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl DenseArray {
    pub fn zeros(shape: &[usize]) -> Self {
        DenseArray { shape: shape.to_vec(), data: vec![0.0; shape.iter().product()] }
    }

    /// Panics if `data` does not fill `shape`.
    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Self {
        assert_eq!(shape.iter().product::<usize>(), data.len(), "data does not fit shape {shape:?}");
        DenseArray { shape: shape.to_vec(), data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat offset of a full index.
    pub fn offset(&self, idx: &[usize]) -> usize {
        debug_assert_eq!(idx.len(), self.shape.len());
        idx.iter().zip(&self.shape).fold(0, |acc, (&i, &n)| {
            debug_assert!(i < n, "index {i} out of bounds {n}");
            acc * n + i
        })
    }

    pub fn get(&self, idx: &[usize]) -> f64 {
        self.data[self.offset(idx)]
    }

    pub fn add(&mut self, idx: &[usize], value: f64) {
        let o = self.offset(idx);
        self.data[o] += value;
    }

    pub fn set(&mut self, idx: &[usize], value: f64) {
        let o = self.offset(idx);
        self.data[o] = value;
    }

    /// Contiguous values under a prefix of the index, e.g. `row(&[e, r])`
    /// of an `[E, R, LI]` array is the loss vector of event `e`, rlz `r`.
    pub fn row(&self, prefix: &[usize]) -> &[f64] {
        let inner: usize = self.shape[prefix.len()..].iter().product();
        let start = prefix.iter().zip(&self.shape).fold(0, |acc, (&i, &n)| acc * n + i) * inner;
        &self.data[start..start + inner]
    }

    /// Sub-arrays along the first axis.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        let inner: usize = self.shape.iter().skip(1).product();
        self.data.chunks(inner.max(1)).take(self.shape.first().copied().unwrap_or(0))
    }
}
