use std::fmt;

pub fn accuracy(targets: &[usize], predictions: &[usize]) -> f64 {
    if targets.is_empty() {
        return 0.;
    }
    let hits = targets
        .iter()
        .zip(predictions)
        .filter(|(t, p)| t == p)
        .count();
    hits as f64 / targets.len() as f64
}

/// `matrix[target][prediction]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize, targets: &[usize], predictions: &[usize]) -> Self {
        let mut matrix = vec![vec![0; n_classes]; n_classes];
        for (&t, &p) in targets.iter().zip(predictions) {
            matrix[t][p] += 1;
        }
        Self { matrix }
    }

    pub fn get(&self, target: usize, prediction: usize) -> usize {
        self.matrix[target][prediction]
    }

    pub fn n_classes(&self) -> usize {
        self.matrix.len()
    }

    fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    fn predicted(&self, class: usize) -> usize {
        self.matrix.iter().map(|row| row[class]).sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.matrix {
            let line = row
                .iter()
                .map(|c| format!("{c:>4}"))
                .collect::<Vec<_>>()
                .join("");
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision, recall and F1 with macro and support-weighted averages.
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub names: Vec<String>,
    pub classes: Vec<ClassScores>,
    pub accuracy: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.
    } else {
        num as f64 / den as f64
    }
}

impl ClassificationReport {
    pub fn new(names: &[String], targets: &[usize], predictions: &[usize]) -> Self {
        let cm = ConfusionMatrix::new(names.len(), targets, predictions);
        Self::from_confusion(names, &cm)
    }

    pub fn from_confusion(names: &[String], cm: &ConfusionMatrix) -> Self {
        let classes = (0..cm.n_classes())
            .map(|c| {
                let hits = cm.get(c, c);
                let support = cm.support(c);
                let precision = ratio(hits, cm.predicted(c));
                let recall = ratio(hits, support);
                let f1 = if precision + recall == 0. {
                    0.
                } else {
                    2. * precision * recall / (precision + recall)
                };
                ClassScores {
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect::<Vec<_>>();
        let total = classes.iter().map(|c| c.support).sum::<usize>();
        let hits = (0..cm.n_classes()).map(|c| cm.get(c, c)).sum::<usize>();
        Self {
            names: names.to_vec(),
            classes,
            accuracy: ratio(hits, total),
        }
    }

    pub fn total_support(&self) -> usize {
        self.classes.iter().map(|c| c.support).sum()
    }

    pub fn macro_avg(&self) -> ClassScores {
        let n = self.classes.len().max(1) as f64;
        let sum = |f: fn(&ClassScores) -> f64| self.classes.iter().map(f).sum::<f64>() / n;
        ClassScores {
            precision: sum(|c| c.precision),
            recall: sum(|c| c.recall),
            f1: sum(|c| c.f1),
            support: self.total_support(),
        }
    }

    pub fn weighted_avg(&self) -> ClassScores {
        let total = self.total_support().max(1) as f64;
        let sum = |f: fn(&ClassScores) -> f64| {
            self.classes
                .iter()
                .map(|c| f(c) * c.support as f64)
                .sum::<f64>()
                / total
        };
        ClassScores {
            precision: sum(|c| c.precision),
            recall: sum(|c| c.recall),
            f1: sum(|c| c.f1),
            support: self.total_support(),
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .names
            .iter()
            .map(String::len)
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or_default();
        let line = |f: &mut fmt::Formatter<'_>, name: &str, s: &ClassScores| {
            writeln!(
                f,
                "{name:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                s.precision, s.recall, s.f1, s.support
            )
        };
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, scores) in self.names.iter().zip(&self.classes) {
            line(f, name, scores)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_support()
        )?;
        line(f, "macro avg", &self.macro_avg())?;
        line(f, "weighted avg", &self.weighted_avg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_counts_hits() {
        assert_eq!(accuracy(&[0, 1, 1, 2], &[0, 1, 2, 2]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.);
    }

    #[test]
    fn confusion_rows_are_targets() {
        let cm = ConfusionMatrix::new(3, &[0, 1, 1, 2], &[0, 1, 2, 2]);
        assert_eq!(cm.get(1, 2), 1);
        assert_eq!(cm.get(2, 1), 0);
        assert_eq!(cm.to_string(), "   1   0   0\n   0   1   1\n   0   0   1\n");
    }

    #[test]
    fn report_scores() {
        let names = ["a", "b", "c"].map(String::from);
        let report = ClassificationReport::new(&names, &[0, 1, 1, 2], &[0, 1, 2, 2]);
        let b = report.classes[1];
        assert_eq!(b.precision, 1.);
        assert_eq!(b.recall, 0.5);
        assert!((b.f1 - 2. / 3.).abs() < 1e-9);
        assert_eq!(report.classes[2].precision, 0.5);
        assert_eq!(report.accuracy, 0.75);
        assert_eq!(report.weighted_avg().support, 4);
        assert!(report.to_string().contains("weighted avg"));
    }

    #[test]
    fn unseen_class_scores_zero() {
        let names = ["a", "b"].map(String::from);
        let report = ClassificationReport::new(&names, &[0, 0], &[0, 0]);
        assert_eq!(report.classes[1].precision, 0.);
        assert_eq!(report.classes[1].f1, 0.);
        assert_eq!(report.macro_avg().f1, 0.5);
    }
}
