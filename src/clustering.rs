use crate::densify::FrequencyMatrix;
use kodama::{linkage, Method};
use log::info;
use ndarray::{Array1, Array2};

custom_error::custom_error! { pub ClusterError
    TooFewSequences{found: usize} = @{
        format!("hierarchical clustering needs at least 2 sequences, found {}", found)
    },
    LabelMismatch{rows: usize, labels: usize} = @{
        format!("frequency matrix has {} rows but {} labels", rows, labels)
    },
}

/// Result of hierarchical clustering
///
/// `linkage` holds one `(cluster1, cluster2, distance, size)` entry per
/// merge. Leaves are clusters `0..n` (the matrix rows), merge `i` creates
/// cluster `n + i`. `labels[i]` names leaf `i`.
#[derive(Debug, Clone)]
pub struct Dendrogram {
    pub k: usize,
    pub linkage: Vec<(usize, usize, f64, usize)>,
    pub labels: Vec<String>,
}

impl Dendrogram {
    pub fn n_leaves(&self) -> usize {
        self.labels.len()
    }

    /// Merge height of a cluster, zero for leaves
    pub fn height(&self, cluster: usize) -> f64 {
        match cluster.checked_sub(self.n_leaves()) {
            Some(step) => self.linkage[step].2,
            None => 0.0,
        }
    }

    /// The two children of a merged cluster, taller subtree first. Equal
    /// heights keep the linkage order.
    pub fn children(&self, cluster: usize) -> Option<(usize, usize)> {
        let step = cluster.checked_sub(self.n_leaves())?;
        let &(cluster1, cluster2, _, _) = self.linkage.get(step)?;

        if self.height(cluster2) > self.height(cluster1) {
            Some((cluster2, cluster1))
        } else {
            Some((cluster1, cluster2))
        }
    }

    pub fn root(&self) -> usize {
        self.n_leaves() + self.linkage.len() - 1
    }

    /// Leaf indices from left to right, descending distance sort at each merge
    pub fn leaf_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.n_leaves());
        let mut stack = vec![self.root()];

        while let Some(cluster) = stack.pop() {
            match self.children(cluster) {
                Some((first, second)) => {
                    stack.push(second);
                    stack.push(first);
                }
                None => order.push(cluster),
            }
        }

        order
    }

    /// Labels in [`Dendrogram::leaf_order`]
    pub fn ordered_labels(&self) -> Vec<&str> {
        self.leaf_order()
            .into_iter()
            .map(|leaf| self.labels[leaf].as_str())
            .collect()
    }

    /// Newick tree with branch lengths, children in leaf order
    pub fn to_newick(&self) -> String {
        let n = self.n_leaves();
        let mut subtrees: Vec<String> = self.labels.iter().map(|l| newick_label(l)).collect();

        for step in 0..self.linkage.len() {
            let cluster = n + step;
            let height = self.height(cluster);
            if let Some((first, second)) = self.children(cluster) {
                let subtree = format!(
                    "({}:{},{}:{})",
                    subtrees[first],
                    height - self.height(first),
                    subtrees[second],
                    height - self.height(second)
                );
                subtrees.push(subtree);
            }
        }

        format!("{};", subtrees[self.root()])
    }
}

/// Quote labels that contain Newick punctuation
fn newick_label(label: &str) -> String {
    if label
        .chars()
        .any(|c| matches!(c, '(' | ')' | ',' | ':' | ';' | '\'' | '[' | ']') || c.is_whitespace())
    {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

/// Performs hierarchical clustering using Ward's method
///
/// # Arguments
/// * `matrix` - rows are sequences, columns are canonical k-mer counts
///
/// # Returns
/// * A Dendrogram carrying the linkage and the matrix labels, leaf `i` being row `i`
pub fn hierarchical_clustering(matrix: FrequencyMatrix) -> Result<Dendrogram, ClusterError> {
    let FrequencyMatrix { k, data, labels } = matrix;
    let n_samples = data.nrows();

    if labels.len() != n_samples {
        return Err(ClusterError::LabelMismatch {
            rows: n_samples,
            labels: labels.len(),
        });
    }
    if n_samples < 2 {
        return Err(ClusterError::TooFewSequences { found: n_samples });
    }

    // Convert ndarray to condensed distance matrix format for kodama
    let mut condensed = compute_distance_matrix(&data).to_vec();

    let dendrogram = linkage(&mut condensed, n_samples, Method::Ward);

    let linkage_info: Vec<(usize, usize, f64, usize)> = dendrogram
        .steps()
        .iter()
        .map(|step| (step.cluster1, step.cluster2, step.dissimilarity, step.size))
        .collect();
    info!("Clustered {} sequences in {} merges", n_samples, linkage_info.len());

    Ok(Dendrogram {
        k,
        linkage: linkage_info,
        labels,
    })
}

/// Condensed pairwise Euclidean distances between rows, upper triangle in
/// row-major order
fn compute_distance_matrix(data: &Array2<f64>) -> Array1<f64> {
    let n = data.nrows();
    let n_distances = (n * (n - 1)) / 2;
    let mut distances = Array1::zeros(n_distances);

    let mut idx = 0;
    for i in 0..n {
        let row_i = data.row(i);
        for j in (i + 1)..n {
            let diff = &row_i - &data.row(j);
            distances[idx] = diff.dot(&diff).sqrt();
            idx += 1;
        }
    }

    distances
}
