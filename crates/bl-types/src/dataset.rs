//! Observations and the append-only dataset the loop accumulates.

use serde::{Deserialize, Serialize};

/// Whether we are minimizing or maximizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Minimize,
    Maximize,
}

impl Sense {
    /// +1 for minimization, -1 for maximization. Multiplying `best - value`
    /// by this gives a quantity that is positive when `value` improves.
    pub fn sign(self) -> f64 {
        match self {
            Self::Minimize => 1.0,
            Self::Maximize => -1.0,
        }
    }

    /// True when `candidate` is strictly better than `current`.
    pub fn improves(self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Minimize => candidate < current,
            Self::Maximize => candidate > current,
        }
    }
}

impl Default for Sense {
    fn default() -> Self {
        Self::Minimize
    }
}

/// One evaluated point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub x: Vec<f64>,
    pub y: f64,
}

impl Observation {
    pub fn new(x: Vec<f64>, y: f64) -> Self {
        Self { x, y }
    }
}

/// Append-only sequence of observations with a running incumbent.
///
/// Deserialization replays the observations, so the incumbent is always
/// recomputed rather than read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DatasetRecord")]
pub struct Dataset {
    sense: Sense,
    observations: Vec<Observation>,
    best_index: Option<usize>,
}

/// Serialized form of a [`Dataset`]; any stored incumbent index is ignored.
#[derive(Deserialize)]
struct DatasetRecord {
    sense: Sense,
    observations: Vec<Observation>,
}

impl From<DatasetRecord> for Dataset {
    fn from(record: DatasetRecord) -> Self {
        let mut dataset = Dataset::new(record.sense);
        for observation in record.observations {
            dataset.push(observation);
        }
        dataset
    }
}

impl Dataset {
    pub fn new(sense: Sense) -> Self {
        Self {
            sense,
            observations: Vec::new(),
            best_index: None,
        }
    }

    pub fn sense(&self) -> Sense {
        self.sense
    }

    pub fn push(&mut self, observation: Observation) {
        let index = self.observations.len();
        let improved = match self.best_index {
            None => true,
            Some(best) => self
                .sense
                .improves(observation.y, self.observations[best].y),
        };
        self.observations.push(observation);
        if improved {
            self.best_index = Some(index);
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn last(&self) -> Option<&Observation> {
        self.observations.last()
    }

    /// The incumbent: first observation achieving the best value.
    pub fn best(&self) -> Option<&Observation> {
        self.best_index.and_then(|i| self.observations.get(i))
    }

    pub fn best_y(&self) -> Option<f64> {
        self.best().map(|o| o.y)
    }

    /// Euclidean distance between the two most recent observations.
    pub fn last_step_distance(&self) -> Option<f64> {
        let n = self.observations.len();
        if n < 2 {
            return None;
        }
        let a = &self.observations[n - 1].x;
        let b = &self.observations[n - 2].x;
        Some(
            a.iter()
                .zip(b)
                .map(|(p, q)| (p - q) * (p - q))
                .sum::<f64>()
                .sqrt(),
        )
    }

    /// Rows of `[x_1..x_d, y]` in evaluation order.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.observations
            .iter()
            .map(|o| {
                let mut row = o.x.clone();
                row.push(o.y);
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_tracking_minimize() {
        let mut data = Dataset::new(Sense::Minimize);
        assert!(data.best_y().is_none());

        data.push(Observation::new(vec![0.0], 3.0));
        data.push(Observation::new(vec![1.0], 1.0));
        data.push(Observation::new(vec![2.0], 2.0));
        assert_eq!(data.best_y(), Some(1.0));
        assert_eq!(data.best().unwrap().x, vec![1.0]);
    }

    #[test]
    fn best_tracking_maximize() {
        let mut data = Dataset::new(Sense::Maximize);
        data.push(Observation::new(vec![0.0], 3.0));
        data.push(Observation::new(vec![1.0], 1.0));
        assert_eq!(data.best_y(), Some(3.0));
    }

    #[test]
    fn ties_keep_first_incumbent() {
        let mut data = Dataset::new(Sense::Minimize);
        data.push(Observation::new(vec![0.0], 1.0));
        data.push(Observation::new(vec![5.0], 1.0));
        assert_eq!(data.best().unwrap().x, vec![0.0]);
    }

    #[test]
    fn last_step_distance_uses_two_latest() {
        let mut data = Dataset::new(Sense::Minimize);
        data.push(Observation::new(vec![0.0, 0.0], 1.0));
        assert!(data.last_step_distance().is_none());
        data.push(Observation::new(vec![3.0, 4.0], 1.0));
        assert!((data.last_step_distance().unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn rows_append_objective_value() {
        let mut data = Dataset::new(Sense::Minimize);
        data.push(Observation::new(vec![1.0, 2.0], 3.0));
        assert_eq!(data.to_rows(), vec![vec![1.0, 2.0, 3.0]]);
    }

    #[test]
    fn deserializing_recomputes_the_incumbent() {
        let json = r#"{
            "sense": "Minimize",
            "observations": [{"x": [0.0], "y": 2.0}, {"x": [1.0], "y": 0.5}],
            "best_index": 7
        }"#;
        let data: Dataset = serde_json::from_str(json).unwrap();
        assert_eq!(data.best_y(), Some(0.5));
        assert_eq!(data.best().unwrap().x, vec![1.0]);

        let mut original = Dataset::new(Sense::Maximize);
        original.push(Observation::new(vec![0.0], 1.0));
        original.push(Observation::new(vec![2.0], 4.0));
        let back: Dataset = serde_json::from_str(&serde_json::to_string(&original).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn sense_sign_and_improves() {
        assert_eq!(Sense::Minimize.sign(), 1.0);
        assert_eq!(Sense::Maximize.sign(), -1.0);
        assert!(Sense::Minimize.improves(0.5, 1.0));
        assert!(!Sense::Maximize.improves(0.5, 1.0));
    }
}
