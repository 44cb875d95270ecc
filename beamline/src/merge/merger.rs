//! Running-average accumulation of replica outputs.

use super::estimator::{Estimator, Page};
use tracing::debug;

/// Accumulates replica outputs into running-averaged estimators.
///
/// The fold count is tracked per page, not globally: a replica that lacks
/// some pages (it crashed before writing them) advances only the counters
/// of the pages it actually delivered, so the averaging weight of every
/// page stays correct.
#[derive(Debug, Default)]
pub struct MergeAccumulator {
    estimators: Vec<EstimatorAcc>,
}

#[derive(Debug)]
struct EstimatorAcc {
    name: String,
    pages: Vec<PageAcc>,
}

#[derive(Debug)]
struct PageAcc {
    page: Page,
    /// Number of replicas folded into this page so far.
    folds: u64,
}

impl MergeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no replica has contributed anything yet.
    pub fn is_empty(&self) -> bool {
        self.estimators.is_empty()
    }

    /// Folds one replica's output into the accumulator.
    ///
    /// Estimators are matched positionally; when the name at a position
    /// disagrees, the destination is located by a linear search on name.
    /// Pages are matched the same way on page number. Estimators or pages
    /// the accumulator has not seen before are adopted as-is with a fold
    /// count of one.
    ///
    /// Per element, with k replicas already folded into the target page:
    /// `new = old * k/(k+1) + value/(k+1)`.
    pub fn fold(&mut self, replica: Vec<Estimator>) {
        for (position, estimator) in replica.into_iter().enumerate() {
            let index = self.estimator_index(position, &estimator.name);
            match index {
                Some(index) => self.estimators[index].fold(estimator),
                None => {
                    debug!(name = %estimator.name, "Adopting estimator from replica");
                    self.estimators.push(EstimatorAcc::adopt(estimator));
                }
            }
        }
    }

    /// Consumes the accumulator, yielding the merged estimators.
    pub fn into_estimators(self) -> Vec<Estimator> {
        self.estimators
            .into_iter()
            .map(|acc| Estimator {
                name: acc.name,
                pages: acc.pages.into_iter().map(|p| p.page).collect(),
            })
            .collect()
    }

    fn estimator_index(&self, position: usize, name: &str) -> Option<usize> {
        if let Some(candidate) = self.estimators.get(position) {
            if candidate.name == name {
                return Some(position);
            }
        }
        self.estimators.iter().position(|e| e.name == name)
    }
}

impl EstimatorAcc {
    fn adopt(estimator: Estimator) -> Self {
        Self {
            name: estimator.name,
            pages: estimator
                .pages
                .into_iter()
                .map(|page| PageAcc { page, folds: 1 })
                .collect(),
        }
    }

    fn fold(&mut self, estimator: Estimator) {
        for (position, page) in estimator.pages.into_iter().enumerate() {
            let index = self.page_index(position, page.page_number);
            match index {
                Some(index) => self.pages[index].fold(page),
                None => self.pages.push(PageAcc { page, folds: 1 }),
            }
        }
    }

    fn page_index(&self, position: usize, page_number: u32) -> Option<usize> {
        if let Some(candidate) = self.pages.get(position) {
            if candidate.page.page_number == page_number {
                return Some(position);
            }
        }
        self.pages
            .iter()
            .position(|p| p.page.page_number == page_number)
    }
}

impl PageAcc {
    fn fold(&mut self, incoming: Page) {
        let k = self.folds as f64;
        for (old, value) in self.page.values.iter_mut().zip(incoming.values) {
            *old = *old * (k / (k + 1.0)) + value / (k + 1.0);
        }
        self.folds += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(name: &str, page_number: u32, values: Vec<f64>) -> Vec<Estimator> {
        vec![Estimator::new(
            name,
            vec![Page::new(page_number, "Dose", "Gy", values)],
        )]
    }

    fn merged_values(acc: MergeAccumulator) -> Vec<f64> {
        acc.into_estimators()[0].pages[0].values.clone()
    }

    #[test]
    fn test_identical_replicas_average_to_themselves() {
        let mut acc = MergeAccumulator::new();
        for _ in 0..5 {
            acc.fold(replica("dose", 0, vec![2.0, 4.0, 8.0]));
        }
        // Equal-weight running mean of identical inputs is exact, not
        // merely within tolerance.
        assert_eq!(merged_values(acc), vec![2.0, 4.0, 8.0]);
    }

    #[test]
    fn test_mean_of_distinct_replicas() {
        let mut acc = MergeAccumulator::new();
        acc.fold(replica("dose", 0, vec![1.0]));
        acc.fold(replica("dose", 0, vec![2.0]));
        acc.fold(replica("dose", 0, vec![3.0]));
        acc.fold(replica("dose", 0, vec![6.0]));

        let values = merged_values(acc);
        assert!((values[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_estimator_matched_by_name_when_order_differs() {
        let mut acc = MergeAccumulator::new();
        acc.fold(vec![
            Estimator::new("dose", vec![Page::new(0, "Dose", "Gy", vec![2.0])]),
            Estimator::new("fluence", vec![Page::new(0, "Fluence", "1/cm^2", vec![10.0])]),
        ]);
        // Second replica enumerates the estimators in the opposite order.
        acc.fold(vec![
            Estimator::new("fluence", vec![Page::new(0, "Fluence", "1/cm^2", vec![20.0])]),
            Estimator::new("dose", vec![Page::new(0, "Dose", "Gy", vec![4.0])]),
        ]);

        let estimators = acc.into_estimators();
        let dose = estimators.iter().find(|e| e.name == "dose").unwrap();
        let fluence = estimators.iter().find(|e| e.name == "fluence").unwrap();
        assert!((dose.pages[0].values[0] - 3.0).abs() < 1e-12);
        assert!((fluence.pages[0].values[0] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_pages_matched_by_number_when_order_differs() {
        let mut acc = MergeAccumulator::new();
        acc.fold(vec![Estimator::new(
            "dose",
            vec![
                Page::new(0, "Dose", "Gy", vec![1.0]),
                Page::new(1, "Error", "Gy", vec![0.1]),
            ],
        )]);
        acc.fold(vec![Estimator::new(
            "dose",
            vec![
                Page::new(1, "Error", "Gy", vec![0.3]),
                Page::new(0, "Dose", "Gy", vec![3.0]),
            ],
        )]);

        let estimators = acc.into_estimators();
        let pages = &estimators[0].pages;
        let page0 = pages.iter().find(|p| p.page_number == 0).unwrap();
        let page1 = pages.iter().find(|p| p.page_number == 1).unwrap();
        assert!((page0.values[0] - 2.0).abs() < 1e-12);
        assert!((page1.values[0] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_missing_replica_does_not_advance_fold_count() {
        let mut acc = MergeAccumulator::new();
        acc.fold(replica("dose", 0, vec![1.0]));
        // A replica that produced nothing contributes nothing.
        acc.fold(Vec::new());
        acc.fold(replica("dose", 0, vec![3.0]));

        // Mean of the two real replicas, unaffected by the empty one.
        let values = merged_values(acc);
        assert!((values[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_replica_missing_one_page_keeps_other_weights() {
        let mut acc = MergeAccumulator::new();
        acc.fold(vec![Estimator::new(
            "dose",
            vec![
                Page::new(0, "Dose", "Gy", vec![1.0]),
                Page::new(1, "Error", "Gy", vec![10.0]),
            ],
        )]);
        // Second replica delivered only page 0.
        acc.fold(vec![Estimator::new(
            "dose",
            vec![Page::new(0, "Dose", "Gy", vec![3.0])],
        )]);
        acc.fold(vec![Estimator::new(
            "dose",
            vec![
                Page::new(0, "Dose", "Gy", vec![5.0]),
                Page::new(1, "Error", "Gy", vec![20.0]),
            ],
        )]);

        let estimators = acc.into_estimators();
        let pages = &estimators[0].pages;
        let page0 = pages.iter().find(|p| p.page_number == 0).unwrap();
        let page1 = pages.iter().find(|p| p.page_number == 1).unwrap();
        // Page 0 averaged over three replicas, page 1 over the two that
        // delivered it.
        assert!((page0.values[0] - 3.0).abs() < 1e-12);
        assert!((page1.values[0] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_accumulator() {
        let acc = MergeAccumulator::new();
        assert!(acc.is_empty());
        assert!(acc.into_estimators().is_empty());
    }
}
